//! Bounding-box axis correction.
//!
//! The detector reports pixel rows top-to-bottom; the estimators downstream
//! expect them bottom-to-top. [`normalize`] performs that flip and is the only
//! way to obtain a [`NormalizedBBox`], so every box is flipped exactly once.

use objloc_types::{BoundingBox, LocError};

/// A detection whose rows follow the bottom-to-top convention.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBBox {
    pub class: String,
    pub probability: f64,
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
    /// Depth sample (metres).
    pub depth: f32,
    pub image_height: i64,
}

impl NormalizedBBox {
    pub fn width_px(&self) -> i64 {
        self.xmax - self.xmin
    }

    pub fn height_px(&self) -> i64 {
        self.ymax - self.ymin
    }

    /// Pixel centre `(u, v)` in the bottom-to-top convention.
    pub fn centre(&self) -> (f32, f32) {
        (
            (self.xmin + self.xmax) as f32 * 0.5,
            (self.ymin + self.ymax) as f32 * 0.5,
        )
    }
}

/// Flip `bbox` into the bottom-to-top convention:
/// `ymin' = H − ymax`, `ymax' = H − ymin`.
///
/// Rejects inverted extents, non-finite depth and a non-positive
/// `image_height` with [`LocError::InvalidInput`].
pub fn normalize(bbox: &BoundingBox, image_height: i64) -> Result<NormalizedBBox, LocError> {
    if image_height <= 0 {
        return Err(LocError::InvalidInput(format!(
            "image height must be positive, got {image_height}"
        )));
    }
    if bbox.ymax < bbox.ymin || bbox.xmax < bbox.xmin {
        return Err(LocError::InvalidInput(format!(
            "inverted bounding box for {:?}: x [{}, {}], y [{}, {}]",
            bbox.class, bbox.xmin, bbox.xmax, bbox.ymin, bbox.ymax
        )));
    }
    if !bbox.z.is_finite() {
        return Err(LocError::InvalidInput(format!(
            "non-finite depth {} for {:?}",
            bbox.z, bbox.class
        )));
    }

    Ok(NormalizedBBox {
        class: bbox.class.clone(),
        probability: bbox.probability,
        xmin: bbox.xmin,
        ymin: image_height - bbox.ymax,
        xmax: bbox.xmax,
        ymax: image_height - bbox.ymin,
        depth: bbox.z,
        image_height,
    })
}
