//! `objloc-types` – shared data model for the object localization stack.
//!
//! Every message that crosses the event bus is defined here, together with
//! the [`LocError`] type returned by all library crates.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Headers
// ────────────────────────────────────────────────────────────────────────────

/// Stamped metadata attached to every sensor message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Header {
    #[serde(default)]
    pub seq: u32,
    pub stamp: DateTime<Utc>,
    /// Coordinate frame the payload is expressed in, e.g. `"zed2_left_camera_frame"`.
    #[serde(default)]
    pub frame_id: String,
}

impl Header {
    /// A header stamped with the current time.
    pub fn now(frame_id: impl Into<String>) -> Self {
        Self {
            seq: 0,
            stamp: Utc::now(),
            frame_id: frame_id.into(),
        }
    }

    /// Copy of this header with the stamp replaced by the current time.
    pub fn restamped(&self) -> Self {
        Self {
            stamp: Utc::now(),
            ..self.clone()
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Point clouds
// ────────────────────────────────────────────────────────────────────────────

/// One depth sample. Invalid returns are encoded as NaN coordinates.
///
/// JSON has no NaN, so `null` coordinates deserialize as NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CloudPoint {
    #[serde(deserialize_with = "nan_if_null")]
    #[schemars(with = "Option<f32>")]
    pub x: f32,
    #[serde(deserialize_with = "nan_if_null")]
    #[schemars(with = "Option<f32>")]
    pub y: f32,
    #[serde(deserialize_with = "nan_if_null")]
    #[schemars(with = "Option<f32>")]
    pub z: f32,
}

fn nan_if_null<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(f32::NAN))
}

impl CloudPoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// True when all three coordinates are finite.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A depth sensor's view of the scene at one instant.
///
/// Organized clouds store `height` rows of `width` samples in row-major
/// order. Unorganized clouds have `height == 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PointCloudFrame {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub points: Vec<CloudPoint>,
}

impl PointCloudFrame {
    /// Build an unorganized cloud (a single row).
    pub fn unorganized(header: Header, points: Vec<CloudPoint>) -> Self {
        Self {
            header,
            width: points.len() as u32,
            height: 1,
            points,
        }
    }

    /// Number of samples with finite coordinates.
    pub fn valid_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_valid()).count()
    }

    /// Sample at pixel `(u, v)` of an organized cloud.
    ///
    /// Returns `None` when the pixel is outside the cloud or the sample is
    /// invalid.
    pub fn point_at(&self, u: u32, v: u32) -> Option<CloudPoint> {
        if u >= self.width || v >= self.height {
            return None;
        }
        let index = v as usize * self.width as usize + u as usize;
        self.points.get(index).copied().filter(CloudPoint::is_valid)
    }

    /// Reject clouds without samples or whose dimensions disagree with the
    /// sample count.
    pub fn validate(&self) -> Result<(), LocError> {
        if self.points.is_empty() {
            return Err(LocError::InvalidInput(format!(
                "point cloud from {} carries no samples",
                self.header.frame_id
            )));
        }
        let expected = self.width as usize * self.height as usize;
        if expected != self.points.len() {
            return Err(LocError::InvalidInput(format!(
                "point cloud is {}x{} but carries {} samples",
                self.width,
                self.height,
                self.points.len()
            )));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Detections
// ────────────────────────────────────────────────────────────────────────────

/// A labeled 2-D detection as produced by the object detector.
///
/// Pixel rows follow the wire convention: `y` grows from the top of the
/// image downwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    #[serde(rename = "Class")]
    pub class: String,
    pub probability: f64,
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
    /// Depth sample for the detection (metres).
    pub z: f32,
}

/// One detector output frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionBatch {
    pub header: Header,
    pub image_header: Header,
    pub bounding_boxes: Vec<BoundingBox>,
}

// ────────────────────────────────────────────────────────────────────────────
// Outbound messages
// ────────────────────────────────────────────────────────────────────────────

/// Physical size and bearing estimate for one detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BBoxEstimate {
    #[serde(rename = "Class")]
    pub class: String,
    pub probability: f64,
    /// Metric width (metres); zero when not computed.
    pub width: f32,
    /// Metric height (metres); zero when not computed.
    pub height: f32,
    pub z: f32,
    pub centre_angle_x: f32,
    pub centre_angle_y: f32,
}

/// All estimates derived from one [`DetectionBatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateBatch {
    pub header: Header,
    pub image_header: Header,
    pub bounding_boxes: Vec<BBoxEstimate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Rotation in (w, x, y, z) order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Stamped pose of a localized object, published on a named stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPose {
    pub header: Header,
    /// Pose stream name, e.g. `"middle_pose"`.
    pub stream: String,
    pub position: Position,
    pub orientation: Rotation,
}

/// Stamped debug point, one stream per object label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPoint {
    pub header: Header,
    pub name: String,
    pub position: Position,
}

/// Fused position of a labeled object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    #[serde(rename = "objectID")]
    pub object_id: String,
    pub position: Position,
}

// ────────────────────────────────────────────────────────────────────────────
// Event bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"objloc-runtime::orchestrator"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Detections(DetectionBatch),
    PointCloud(PointCloudFrame),
    Estimates(EstimateBatch),
    Pose(ObjectPose),
    Point(ObjectPoint),
    Landmark(Landmark),
    Fault { component: String, message: String },
}

/// Inbound payloads accepted by the localization node. Used for schema export.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum InboundPayload {
    Detections(DetectionBatch),
    PointCloud(PointCloudFrame),
}

impl From<InboundPayload> for EventPayload {
    fn from(value: InboundPayload) -> Self {
        match value {
            InboundPayload::Detections(b) => EventPayload::Detections(b),
            InboundPayload::PointCloud(f) => EventPayload::PointCloud(f),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error type shared by the localization crates.
///
/// None of these conditions is fatal to the node: the offending detection,
/// frame or pose cycle is dropped and processing continues.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No usable geometry: {0}")]
    NoUsableGeometry(String),

    #[error("Collaborator {collaborator} failed: {details}")]
    CollaboratorFailure {
        collaborator: String,
        details: String,
    },

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Cached frame is stale ({age_ms} ms old, limit {max_age_ms} ms)")]
    StaleFrame { age_ms: u64, max_age_ms: u64 },

    #[error("Event bus error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LocError {
    pub fn collaborator(name: &str, details: impl Into<String>) -> Self {
        LocError::CollaboratorFailure {
            collaborator: name.to_string(),
            details: details.into(),
        }
    }
}
