//! Depth-band point segmentation.
//!
//! Isolates the foreground object in a [`PointCloudFrame`] in two passes:
//!
//! 1. Find `z_closest`, the smallest `|z|` over all valid samples. This is
//!    the nearest surface seen by the sensor.
//! 2. Keep every valid sample whose `|z|` is below `z_closest + threshold`.
//!
//! The band is relative to the nearest surface, so the result does not depend
//! on how far the camera stands off from the scene.
//!
//! # Example
//!
//! ```rust
//! use objloc_perception::segment::segment;
//! use objloc_types::{CloudPoint, Header, PointCloudFrame};
//!
//! let frame = PointCloudFrame::unorganized(
//!     Header::now("zed2"),
//!     vec![
//!         CloudPoint::new(0.0, 0.0, 1.0),
//!         CloudPoint::new(0.1, 0.0, 1.2),
//!         CloudPoint::new(0.0, 0.2, 3.0),
//!     ],
//! );
//!
//! let set = segment(&frame, 0.3).unwrap();
//! assert_eq!(set.z_closest, Some(1.0));
//! assert_eq!(set.len(), 2);
//! ```

use objloc_types::{CloudPoint, LocError, PointCloudFrame};
use tracing::debug;

/// Points of a frame that lie within the depth band above the nearest
/// surface.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentedPointSet {
    /// Smallest `|z|` over valid samples; `None` when the frame had none.
    pub z_closest: Option<f32>,
    /// Band width used for the selection (metres).
    pub threshold: f32,
    pub points: Vec<CloudPoint>,
}

impl SegmentedPointSet {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Smallest `|z|` over the valid samples of `frame`.
pub fn nearest_surface(frame: &PointCloudFrame) -> Option<f32> {
    frame
        .points
        .iter()
        .filter(|p| p.is_valid())
        .map(|p| p.z.abs())
        .fold(None, |closest, z| match closest {
            Some(c) if c <= z => Some(c),
            _ => Some(z),
        })
}

/// Select the samples of `frame` with `|z| < z_closest + threshold`.
///
/// An all-invalid frame yields an empty set with `z_closest == None`; the
/// caller decides what an empty set means. A negative or non-finite
/// `threshold` is rejected.
pub fn segment(frame: &PointCloudFrame, threshold: f32) -> Result<SegmentedPointSet, LocError> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(LocError::InvalidInput(format!(
            "segmentation threshold must be a finite, non-negative depth, got {threshold}"
        )));
    }

    let Some(z_closest) = nearest_surface(frame) else {
        debug!(samples = frame.points.len(), "no valid samples in frame");
        return Ok(SegmentedPointSet {
            z_closest: None,
            threshold,
            points: Vec::new(),
        });
    };

    let limit = threshold + z_closest;
    let points: Vec<CloudPoint> = frame
        .points
        .iter()
        .filter(|p| p.is_valid() && p.z.abs() < limit)
        .copied()
        .collect();

    debug!(
        z_closest,
        threshold,
        kept = points.len(),
        samples = frame.points.len(),
        "segmented foreground band"
    );

    Ok(SegmentedPointSet {
        z_closest: Some(z_closest),
        threshold,
        points,
    })
}
