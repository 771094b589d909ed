//! Camera-model collaborators.
//!
//! - [`SizeAngleEstimator`] – converts a [`NormalizedBBox`] and its depth into
//!   a metric size and the bearing angles of the box centre.
//! - [`FrameCoordinateResolver`] – converts bearing angles and depth into a
//!   position in the sensor frame.
//!
//! The pinhole implementations assume an ideal, undistorted camera described
//! by [`CameraModel`]. Defaults match a ZED2 in VGA mode (672×376).

use objloc_types::LocError;
use serde::{Deserialize, Serialize};

use crate::bbox::NormalizedBBox;
use crate::geometry::Vec3;

/// Intrinsics of an ideal pinhole camera, expressed through its field of view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraModel {
    pub image_width: u32,
    pub image_height: u32,
    /// Horizontal field of view (degrees).
    pub hfov_deg: f32,
    /// Vertical field of view (degrees).
    pub vfov_deg: f32,
}

impl Default for CameraModel {
    fn default() -> Self {
        Self {
            image_width: 672,
            image_height: 376,
            hfov_deg: 110.0,
            vfov_deg: 70.0,
        }
    }
}

impl CameraModel {
    /// Focal lengths `(fx, fy)` in pixels.
    pub fn focal_lengths(&self) -> (f32, f32) {
        let fx = self.image_width as f32 * 0.5 / (self.hfov_deg.to_radians() * 0.5).tan();
        let fy = self.image_height as f32 * 0.5 / (self.vfov_deg.to_radians() * 0.5).tan();
        (fx, fy)
    }

    pub fn validate(&self) -> Result<(), LocError> {
        let fov_ok = |f: f32| f.is_finite() && f > 0.0 && f < 180.0;
        if self.image_width == 0 || self.image_height == 0 {
            return Err(LocError::Config("camera image size must be non-zero".into()));
        }
        if !fov_ok(self.hfov_deg) || !fov_ok(self.vfov_deg) {
            return Err(LocError::Config(format!(
                "field of view must be in (0, 180) degrees, got {}x{}",
                self.hfov_deg, self.vfov_deg
            )));
        }
        Ok(())
    }
}

/// Metric size and centre bearing of a detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeAngle {
    /// Metres.
    pub width: f32,
    /// Metres.
    pub height: f32,
    /// Horizontal bearing of the box centre, positive to the right (radians).
    pub angle_x: f32,
    /// Vertical bearing of the box centre, positive upwards (radians).
    pub angle_y: f32,
}

pub trait SizeAngleEstimator: Send + Sync {
    fn estimate(&self, bbox: &NormalizedBBox) -> Result<SizeAngle, LocError>;
}

pub trait FrameCoordinateResolver: Send + Sync {
    /// Position in the sensor frame (x forward, y left, z up).
    fn resolve(&self, angle_x: f32, angle_y: f32, depth: f32) -> Result<Vec3, LocError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Pinhole implementations
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct PinholeSizeAngleEstimator {
    pub camera: CameraModel,
}

impl PinholeSizeAngleEstimator {
    pub fn new(camera: CameraModel) -> Self {
        Self { camera }
    }
}

impl SizeAngleEstimator for PinholeSizeAngleEstimator {
    fn estimate(&self, bbox: &NormalizedBBox) -> Result<SizeAngle, LocError> {
        if !(bbox.depth > 0.0) {
            return Err(LocError::collaborator(
                "size_angle_estimator",
                format!("depth must be positive, got {}", bbox.depth),
            ));
        }
        let (fx, fy) = self.camera.focal_lengths();
        let cx = self.camera.image_width as f32 * 0.5;
        let cy = self.camera.image_height as f32 * 0.5;
        let (u, v) = bbox.centre();

        Ok(SizeAngle {
            width: bbox.width_px() as f32 * bbox.depth / fx,
            height: bbox.height_px() as f32 * bbox.depth / fy,
            angle_x: ((u - cx) / fx).atan(),
            angle_y: ((v - cy) / fy).atan(),
        })
    }
}

/// Projects a bearing and an optical-axis depth into the sensor frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinholeResolver;

impl FrameCoordinateResolver for PinholeResolver {
    fn resolve(&self, angle_x: f32, angle_y: f32, depth: f32) -> Result<Vec3, LocError> {
        let limit = std::f32::consts::FRAC_PI_2;
        if !(angle_x.abs() < limit && angle_y.abs() < limit) {
            return Err(LocError::collaborator(
                "frame_coordinate_resolver",
                format!("bearing ({angle_x}, {angle_y}) is outside the forward hemisphere"),
            ));
        }
        let p = Vec3::new(depth, -depth * angle_x.tan(), depth * angle_y.tan());
        if !p.is_finite() {
            return Err(LocError::collaborator(
                "frame_coordinate_resolver",
                format!("non-finite position for depth {depth}"),
            ));
        }
        Ok(p)
    }
}
