//! [`LocalizationOrchestrator`] – the localization pipeline driver.
//!
//! Consumes two independent inputs and publishes four kinds of output:
//!
//! | Input | Handler | Output |
//! |---|---|---|
//! | point-cloud frame | [`handle_point_cloud`][LocalizationOrchestrator::handle_point_cloud] | cached; pose when [`LocalizeTrigger::OnFrame`] |
//! | detection batch | [`handle_detections`][LocalizationOrchestrator::handle_detections] | one estimate batch; points and landmarks in [`FusionMode::TwinView`] |
//! | – | [`try_localize`][LocalizationOrchestrator::try_localize] | object pose |
//!
//! Each detection goes through the same steps in both modes:
//!
//! 1. **Normalize** – flip the box rows ([`bbox::normalize`]).
//! 2. **Estimate** – metric size and centre bearing ([`SizeAngleEstimator`]).
//! 3. **Resolve** – bearing + depth to a sensor-frame position
//!    ([`FrameCoordinateResolver`]).
//! 4. **Fuse** (twin view only) – merge with earlier observations of the same
//!    key ([`TwinViewFuser`]).
//!
//! A failing step drops only the offending detection; the batch continues.
//!
//! Pose derivation segments the cached cloud, fits a plane and publishes the
//! centroid with the fit orientation. An empty segment or a failed fit skips
//! the pose for that cycle and nothing else.

use std::time::Duration;

use objloc_middleware::EventBus;
use objloc_perception::bbox;
use objloc_perception::camera::{
    CameraModel, FrameCoordinateResolver, PinholeResolver, PinholeSizeAngleEstimator,
    SizeAngleEstimator,
};
use objloc_perception::geometry::Vec3;
use objloc_perception::plane::{LeastSquaresPlaneFitter, PcaPlaneFitter, PlaneFitter};
use objloc_perception::segment::segment;
use objloc_perception::twin_view::{FusionKeying, FusionPolicy, TwinViewFuser};
use objloc_types::{
    BBoxEstimate, BoundingBox, DetectionBatch, EstimateBatch, Event, EventPayload, Landmark,
    LocError, ObjectPoint, ObjectPose, PointCloudFrame, Position,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, trace, warn};

use crate::frame_cache::FrameCache;

const SOURCE: &str = "objloc-runtime::orchestrator";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Which detection-batch path to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// One camera: estimates carry bearings and depth, width/height zeroed.
    #[default]
    SingleView,
    /// Two overlapping lenses: estimates carry metric size and repeated
    /// labels are fused into landmarks.
    TwinView,
}

/// What causes a localization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalizeTrigger {
    /// Every stored point-cloud frame immediately runs a pass.
    OnFrame,
    /// A pass runs after each detection batch, once a frame is cached.
    #[default]
    OnReadiness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaneFitterKind {
    #[default]
    LeastSquares,
    Pca,
}

impl PlaneFitterKind {
    pub fn build(self) -> Box<dyn PlaneFitter> {
        match self {
            PlaneFitterKind::LeastSquares => Box::new(LeastSquaresPlaneFitter),
            PlaneFitterKind::Pca => Box::new(PcaPlaneFitter::default()),
        }
    }
}

/// Configuration bundle for [`LocalizationOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub mode: FusionMode,
    pub trigger: LocalizeTrigger,
    /// Depth band above the nearest surface kept by segmentation (metres).
    pub segment_threshold: f32,
    /// Name of the pose stream, e.g. `"middle_pose"`.
    pub pose_stream: String,
    /// Cached frames older than this are not localized. `None` disables the
    /// check.
    pub max_frame_age: Option<Duration>,
    pub fusion_policy: FusionPolicy,
    pub fusion_keying: FusionKeying,
    pub plane_fitter: PlaneFitterKind,
    pub camera: CameraModel,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: FusionMode::SingleView,
            trigger: LocalizeTrigger::OnReadiness,
            segment_threshold: 0.3,
            pose_stream: "middle_pose".to_string(),
            max_frame_age: Some(Duration::from_millis(1000)),
            fusion_policy: FusionPolicy::PerBatch,
            fusion_keying: FusionKeying::Label,
            plane_fitter: PlaneFitterKind::LeastSquares,
            camera: CameraModel::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Everything produced while handling one detection batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub estimates: EstimateBatch,
    pub points: Vec<ObjectPoint>,
    pub landmarks: Vec<Landmark>,
    /// Labels of detections that were dropped, with the reason.
    pub dropped: Vec<(String, LocError)>,
    /// Pose from the readiness-triggered localization pass, if one ran and
    /// succeeded.
    pub pose: Option<ObjectPose>,
}

/// A detection that made it through estimation and resolution.
struct Located {
    estimate: BBoxEstimate,
    position: Vec3,
}

// ─────────────────────────────────────────────────────────────────────────────
// LocalizationOrchestrator
// ─────────────────────────────────────────────────────────────────────────────

pub struct LocalizationOrchestrator {
    config: OrchestratorConfig,
    bus: EventBus,
    cache: FrameCache,
    estimator: Box<dyn SizeAngleEstimator>,
    resolver: Box<dyn FrameCoordinateResolver>,
    plane_fitter: Box<dyn PlaneFitter>,
    fuser: TwinViewFuser,
}

impl LocalizationOrchestrator {
    /// Build an orchestrator with the pinhole collaborators and the plane
    /// fitter named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LocError::Config`] for an invalid camera model or threshold.
    pub fn new(config: OrchestratorConfig, bus: EventBus) -> Result<Self, LocError> {
        let estimator = Box::new(PinholeSizeAngleEstimator::new(config.camera));
        let plane_fitter = config.plane_fitter.build();
        Self::with_collaborators(config, bus, estimator, Box::new(PinholeResolver), plane_fitter)
    }

    /// Build an orchestrator with caller-supplied collaborators.
    pub fn with_collaborators(
        config: OrchestratorConfig,
        bus: EventBus,
        estimator: Box<dyn SizeAngleEstimator>,
        resolver: Box<dyn FrameCoordinateResolver>,
        plane_fitter: Box<dyn PlaneFitter>,
    ) -> Result<Self, LocError> {
        config.camera.validate()?;
        if !config.segment_threshold.is_finite() || config.segment_threshold < 0.0 {
            return Err(LocError::Config(format!(
                "segment_threshold must be a non-negative depth, got {}",
                config.segment_threshold
            )));
        }
        info!(
            mode = ?config.mode,
            trigger = ?config.trigger,
            fitter = plane_fitter.name(),
            threshold = config.segment_threshold,
            "localization orchestrator ready"
        );
        let fuser = TwinViewFuser::new(config.fusion_policy, config.fusion_keying);
        Ok(Self {
            config,
            bus,
            cache: FrameCache::new(),
            estimator,
            resolver,
            plane_fitter,
            fuser,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Return a clone of the [`EventBus`] so callers can subscribe to output.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Shared handle to the frame cache.
    pub fn frame_cache(&self) -> FrameCache {
        self.cache.clone()
    }

    // -------------------------------------------------------------------------
    // Point clouds
    // -------------------------------------------------------------------------

    /// Cache `frame`, replacing any earlier one.
    ///
    /// Under [`LocalizeTrigger::OnFrame`] a localization pass runs right away
    /// and its pose, if any, is returned.
    ///
    /// # Errors
    ///
    /// [`LocError::InvalidInput`] when the frame has no samples or its
    /// dimensions disagree with its sample count; such a frame is not cached.
    pub fn handle_point_cloud(
        &mut self,
        frame: PointCloudFrame,
    ) -> Result<Option<ObjectPose>, LocError> {
        frame.validate()?;
        debug!(
            seq = frame.header.seq,
            samples = frame.points.len(),
            "caching point cloud"
        );
        self.cache.store(frame);

        match self.config.trigger {
            LocalizeTrigger::OnFrame => Ok(self.localize_logged()),
            LocalizeTrigger::OnReadiness => Ok(None),
        }
    }

    /// Read the cached sample at pixel `(u, v)` of an organized cloud.
    ///
    /// `None` without a cached frame, outside the frame or on an invalid
    /// sample.
    pub fn point_at_pixel(&self, u: u32, v: u32) -> Option<Position> {
        let (frame, _) = self.cache.latest()?;
        frame
            .point_at(u, v)
            .map(|p| Position::new(p.x, p.y, p.z))
    }

    // -------------------------------------------------------------------------
    // Localization
    // -------------------------------------------------------------------------

    /// Derive and publish an object pose from the cached frame.
    ///
    /// # Errors
    ///
    /// * [`LocError::NotReady`] / [`LocError::StaleFrame`] – no usable frame.
    /// * [`LocError::NoUsableGeometry`] – empty segment or failed plane fit.
    pub fn try_localize(&self) -> Result<ObjectPose, LocError> {
        let frame = self.cache.fresh(self.config.max_frame_age)?;
        let pose = self.localize_frame(&frame)?;
        self.emit(EventPayload::Pose(pose.clone()));
        Ok(pose)
    }

    /// Segment `frame`, fit a plane to the foreground and build the pose.
    /// Nothing is published.
    pub fn localize_frame(&self, frame: &PointCloudFrame) -> Result<ObjectPose, LocError> {
        let _span = info_span!("localize", seq = frame.header.seq).entered();

        let set = segment(frame, self.config.segment_threshold)?;
        if set.is_empty() {
            return Err(LocError::NoUsableGeometry(match set.z_closest {
                None => "frame has no valid points".to_string(),
                Some(z) => format!("no points within {} m of z = {z}", set.threshold),
            }));
        }

        let fit = self.plane_fitter.fit(&set.points)?;
        trace!(residual = fit.residual, points = set.len(), "plane fitted");

        Ok(ObjectPose {
            header: frame.header.restamped(),
            stream: self.config.pose_stream.clone(),
            position: fit.centroid.into(),
            orientation: fit.orientation.to_rotation(),
        })
    }

    /// Run [`try_localize`][Self::try_localize], logging instead of returning
    /// the failure.
    fn localize_logged(&self) -> Option<ObjectPose> {
        match self.try_localize() {
            Ok(pose) => {
                debug!(
                    stream = %pose.stream,
                    x = pose.position.x,
                    y = pose.position.y,
                    z = pose.position.z,
                    "pose published"
                );
                Some(pose)
            }
            Err(e @ LocError::NoUsableGeometry(_)) => {
                debug!(error = %e, "skipping pose this cycle");
                None
            }
            Err(e) => {
                warn!(error = %e, "localization pass skipped");
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Detections
    // -------------------------------------------------------------------------

    /// Process one detection batch and publish its outputs.
    pub fn handle_detections(&mut self, batch: &DetectionBatch) -> BatchOutcome {
        let _span = info_span!(
            "detections",
            mode = ?self.config.mode,
            count = batch.bounding_boxes.len()
        )
        .entered();

        if self.config.mode == FusionMode::TwinView {
            self.fuser.begin_batch();
        }

        let mut outcome = BatchOutcome {
            estimates: EstimateBatch {
                header: batch.header.clone(),
                image_header: batch.image_header.clone(),
                bounding_boxes: Vec::with_capacity(batch.bounding_boxes.len()),
            },
            points: Vec::new(),
            landmarks: Vec::new(),
            dropped: Vec::new(),
            pose: None,
        };

        for raw in &batch.bounding_boxes {
            let located = match self.locate(raw) {
                Ok(located) => located,
                Err(e) => {
                    warn!(class = %raw.class, error = %e, "dropping detection");
                    outcome.dropped.push((raw.class.clone(), e));
                    continue;
                }
            };

            if self.config.mode == FusionMode::TwinView {
                let fused = self.fuser.fuse(&raw.class, located.position);
                if fused.merged {
                    let landmark = Landmark {
                        object_id: fused.label.clone(),
                        position: fused.position.into(),
                    };
                    self.emit(EventPayload::Landmark(landmark.clone()));
                    outcome.landmarks.push(landmark);
                }
                let point = ObjectPoint {
                    header: batch.header.restamped(),
                    name: fused.label,
                    position: fused.position.into(),
                };
                self.emit(EventPayload::Point(point.clone()));
                outcome.points.push(point);
            }

            outcome.estimates.bounding_boxes.push(located.estimate);
        }

        self.emit(EventPayload::Estimates(outcome.estimates.clone()));

        if self.config.trigger == LocalizeTrigger::OnReadiness && !self.cache.is_empty() {
            outcome.pose = self.localize_logged();
        }
        outcome
    }

    /// Normalize, estimate and resolve one detection.
    fn locate(&self, raw: &BoundingBox) -> Result<Located, LocError> {
        let normalized = bbox::normalize(raw, self.config.camera.image_height as i64)?;
        let sa = self.estimator.estimate(&normalized)?;
        let position = self.resolver.resolve(sa.angle_x, sa.angle_y, normalized.depth)?;
        trace!(class = %raw.class, x = position.x, y = position.y, z = position.z, "resolved");

        let (width, height) = match self.config.mode {
            FusionMode::SingleView => (0.0, 0.0),
            FusionMode::TwinView => (sa.width, sa.height),
        };
        Ok(Located {
            estimate: BBoxEstimate {
                class: raw.class.clone(),
                probability: raw.probability,
                width,
                height,
                z: normalized.depth,
                centre_angle_x: sa.angle_x,
                centre_angle_y: sa.angle_y,
            },
            position,
        })
    }

    // -------------------------------------------------------------------------
    // Publishing
    // -------------------------------------------------------------------------

    /// Publish a payload; a topic with no listeners is not an error here.
    fn emit(&self, payload: EventPayload) {
        match self.bus.publish(Event::new(SOURCE, payload)) {
            Ok(receivers) => trace!(receivers, "published"),
            Err(e) => debug!(error = %e, "published with no listeners"),
        }
    }

    /// Report a fault on the alerts topic.
    pub fn report_fault(&self, component: &str, error: &LocError) {
        self.emit(EventPayload::Fault {
            component: component.to_string(),
            message: error.to_string(),
        });
    }
}
