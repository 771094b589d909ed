//! Plane fitting over segmented points.
//!
//! A [`PlaneFitter`] turns the foreground band from
//! [`segment`][crate::segment::segment] into a [`PlaneFit`]: plane equation,
//! per-point errors, a centroid and an [`Orientation`]. The centroid becomes
//! the object position and the orientation its facing.
//!
//! Two fitters are provided:
//!
//! | Fitter | Model | Orientation |
//! |---|---|---|
//! | [`LeastSquaresPlaneFitter`] | `z = a·x + b·y + c` | [`Orientation::PartialHeading`] built from `(a, b, c)` |
//! | [`PcaPlaneFitter`] | smallest principal axis of the covariance | [`Orientation::Full`] rotating +Z onto the normal |

use objloc_types::{CloudPoint, LocError, Rotation};
use serde::{Deserialize, Serialize};

use crate::geometry::{Quaternion, Vec3};

// ────────────────────────────────────────────────────────────────────────────
// Orientation
// ────────────────────────────────────────────────────────────────────────────

/// Orientation produced by a plane fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Orientation {
    /// A complete (w, x, y, z) rotation.
    Full(Quaternion),
    /// Only three components were resolved; `z` is implicitly `1`.
    PartialHeading { w: f32, x: f32, y: f32 },
}

impl Orientation {
    /// Build from a raw component list: 3 components give a
    /// [`PartialHeading`][Orientation::PartialHeading], 4 a
    /// [`Full`][Orientation::Full] quaternion.
    pub fn from_components(components: &[f32]) -> Result<Self, LocError> {
        match *components {
            [w, x, y] => Ok(Orientation::PartialHeading { w, x, y }),
            [w, x, y, z] => Ok(Orientation::Full(Quaternion::new(w, x, y, z))),
            _ => Err(LocError::InvalidInput(format!(
                "orientation needs 3 or 4 components, got {}",
                components.len()
            ))),
        }
    }

    /// Wire rotation. A partial heading is emitted as `(w, x, y, 1)` without
    /// normalization.
    pub fn to_rotation(self) -> Rotation {
        match self {
            Orientation::Full(q) => q.into(),
            Orientation::PartialHeading { w, x, y } => Rotation { w, x, y, z: 1.0 },
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PlaneFit
// ────────────────────────────────────────────────────────────────────────────

/// Result of fitting a plane to a point set.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneFit {
    /// Coefficients `[a, b, c, d]` of `a·x + b·y + c·z + d = 0`.
    pub equation: [f32; 4],
    pub orientation: Orientation,
    /// Per-point signed error, in input order.
    pub errors: Vec<f32>,
    /// Sum of squared errors.
    pub residual: f32,
    /// Mean of the input points.
    pub centroid: Vec3,
}

/// Fits a plane to a set of 3-D points.
///
/// Implementations return [`LocError::NoUsableGeometry`] when the points do
/// not determine a plane (too few, colinear, ...).
pub trait PlaneFitter: Send + Sync {
    fn fit(&self, points: &[CloudPoint]) -> Result<PlaneFit, LocError>;

    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;
}

/// First and second moments of a point set, accumulated in f64.
struct Moments {
    n: usize,
    mean: [f64; 3],
    /// Centered covariance `[xx, xy, xz, yy, yz, zz]`, not divided by `n`.
    scatter: [f64; 6],
}

impl Moments {
    fn of(points: &[CloudPoint]) -> Self {
        let n = points.len();
        let inv_n = 1.0 / n.max(1) as f64;
        let mut mean = [0.0f64; 3];
        for p in points {
            mean[0] += p.x as f64;
            mean[1] += p.y as f64;
            mean[2] += p.z as f64;
        }
        for m in mean.iter_mut() {
            *m *= inv_n;
        }

        let mut scatter = [0.0f64; 6];
        for p in points {
            let dx = p.x as f64 - mean[0];
            let dy = p.y as f64 - mean[1];
            let dz = p.z as f64 - mean[2];
            scatter[0] += dx * dx;
            scatter[1] += dx * dy;
            scatter[2] += dx * dz;
            scatter[3] += dy * dy;
            scatter[4] += dy * dz;
            scatter[5] += dz * dz;
        }
        Self { n, mean, scatter }
    }

    fn centroid(&self) -> Vec3 {
        Vec3::new(self.mean[0] as f32, self.mean[1] as f32, self.mean[2] as f32)
    }
}

fn require_points(points: &[CloudPoint]) -> Result<(), LocError> {
    if points.len() < 3 {
        return Err(LocError::NoUsableGeometry(format!(
            "plane fit needs at least 3 points, got {}",
            points.len()
        )));
    }
    if let Some(bad) = points.iter().find(|p| !p.is_valid()) {
        return Err(LocError::InvalidInput(format!("non-finite point {bad:?} in plane fit")));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// LeastSquaresPlaneFitter
// ────────────────────────────────────────────────────────────────────────────

/// Ordinary least squares on `z = a·x + b·y + c`.
///
/// The orientation is the raw fit vector `(a, b, c)`, reported as
/// [`Orientation::PartialHeading`]. Vertical planes (parallel to the z axis)
/// cannot be expressed in this model and are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastSquaresPlaneFitter;

impl PlaneFitter for LeastSquaresPlaneFitter {
    fn fit(&self, points: &[CloudPoint]) -> Result<PlaneFit, LocError> {
        require_points(points)?;
        let m = Moments::of(points);
        let [sxx, sxy, sxz, syy, syz, _] = m.scatter;

        let det = sxx * syy - sxy * sxy;
        let scale = (sxx + syy) * (sxx + syy);
        if scale < 1e-18 || det.abs() <= 1e-9 * scale {
            return Err(LocError::NoUsableGeometry(
                "points are colinear in the x-y plane; z = a·x + b·y + c is singular".into(),
            ));
        }

        let a = (sxz * syy - syz * sxy) / det;
        let b = (syz * sxx - sxz * sxy) / det;
        let c = m.mean[2] - a * m.mean[0] - b * m.mean[1];

        let errors: Vec<f32> = points
            .iter()
            .map(|p| (p.z as f64 - (a * p.x as f64 + b * p.y as f64 + c)) as f32)
            .collect();
        let residual = errors.iter().map(|e| e * e).sum();

        let (a, b, c) = (a as f32, b as f32, c as f32);
        Ok(PlaneFit {
            equation: [a, b, -1.0, c],
            orientation: Orientation::PartialHeading { w: a, x: b, y: c },
            errors,
            residual,
            centroid: m.centroid(),
        })
    }

    fn name(&self) -> &'static str {
        "least_squares"
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PcaPlaneFitter
// ────────────────────────────────────────────────────────────────────────────

/// Total least squares via principal component analysis.
///
/// The plane normal is the eigenvector of the smallest covariance eigenvalue,
/// flipped to face the sensor origin. Handles planes of any attitude.
#[derive(Debug, Clone, Copy)]
pub struct PcaPlaneFitter {
    /// Minimum ratio of the middle eigenvalue to the eigenvalue sum; below it
    /// the points are treated as colinear.
    pub min_spread_ratio: f64,
}

impl Default for PcaPlaneFitter {
    fn default() -> Self {
        Self {
            min_spread_ratio: 1e-6,
        }
    }
}

impl PlaneFitter for PcaPlaneFitter {
    fn fit(&self, points: &[CloudPoint]) -> Result<PlaneFit, LocError> {
        require_points(points)?;
        let m = Moments::of(points);
        let inv_n = 1.0 / m.n as f64;
        let cov = m.scatter.map(|s| s * inv_n);

        let (eigenvalues, eigenvectors) = sym3x3_eigen(cov);
        let eig_sum = eigenvalues[0] + eigenvalues[1] + eigenvalues[2];
        if eig_sum < 1e-12 {
            return Err(LocError::NoUsableGeometry("points are coincident".into()));
        }
        if eigenvalues[1] / eig_sum < self.min_spread_ratio {
            return Err(LocError::NoUsableGeometry("points are colinear".into()));
        }

        let centroid = m.centroid();
        let [nx, ny, nz] = eigenvectors[2];
        let mut normal = Vec3::new(nx as f32, ny as f32, nz as f32);
        if normal.dot(centroid) > 0.0 {
            normal = normal.scale(-1.0);
        }

        let errors: Vec<f32> = points
            .iter()
            .map(|p| normal.dot(Vec3::from(*p).sub(centroid)))
            .collect();
        let residual = errors.iter().map(|e| e * e).sum();

        Ok(PlaneFit {
            equation: [normal.x, normal.y, normal.z, -normal.dot(centroid)],
            orientation: Orientation::Full(Quaternion::rotation_between(Vec3::unit_z(), normal)),
            errors,
            residual,
            centroid,
        })
    }

    fn name(&self) -> &'static str {
        "pca"
    }
}

/// Eigendecomposition of a 3×3 symmetric matrix `[xx, xy, xz, yy, yz, zz]`.
///
/// Closed-form trigonometric solution (Smith 1961). Eigenvalues are returned
/// in descending order together with their unit eigenvectors.
fn sym3x3_eigen(m: [f64; 6]) -> ([f64; 3], [[f64; 3]; 3]) {
    let [a11, a12, a13, a22, a23, a33] = m;

    let q = (a11 + a22 + a33) / 3.0;
    let p1 = a12 * a12 + a13 * a13 + a23 * a23;

    let eigenvalues = if p1 < 1e-30 {
        let mut evs = [a11, a22, a33];
        evs.sort_unstable_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        evs
    } else {
        let p2 = (a11 - q).powi(2) + (a22 - q).powi(2) + (a33 - q).powi(2) + 2.0 * p1;
        let p = (p2 / 6.0).sqrt();
        let inv_p = 1.0 / p;

        let b11 = (a11 - q) * inv_p;
        let b12 = a12 * inv_p;
        let b13 = a13 * inv_p;
        let b22 = (a22 - q) * inv_p;
        let b23 = a23 * inv_p;
        let b33 = (a33 - q) * inv_p;

        let half_det = (b11 * b22 * b33 + 2.0 * b12 * b13 * b23
            - b11 * b23 * b23
            - b22 * b13 * b13
            - b33 * b12 * b12)
            / 2.0;
        let phi = half_det.clamp(-1.0, 1.0).acos() / 3.0;

        let e1 = q + 2.0 * p * phi.cos();
        let e3 = q + 2.0 * p * (phi + std::f64::consts::TAU / 3.0).cos();
        let e2 = 3.0 * q - e1 - e3;
        [e1, e2, e3]
    };

    let eigenvectors = eigenvalues.map(|lambda| eigenvector_for(m, lambda));
    (eigenvalues, eigenvectors)
}

/// Unit eigenvector of symmetric `m` for eigenvalue `lambda`: the longest
/// cross product of two rows of `m − λI`.
fn eigenvector_for(m: [f64; 6], lambda: f64) -> [f64; 3] {
    let r0 = [m[0] - lambda, m[1], m[2]];
    let r1 = [m[1], m[3] - lambda, m[4]];
    let r2 = [m[2], m[4], m[5] - lambda];

    let cross = |a: [f64; 3], b: [f64; 3]| {
        [
            a[1] * b[2] - a[2] * b[1],
            a[2] * b[0] - a[0] * b[2],
            a[0] * b[1] - a[1] * b[0],
        ]
    };
    let mag = |v: [f64; 3]| v[0] * v[0] + v[1] * v[1] + v[2] * v[2];

    let best = [cross(r0, r1), cross(r0, r2), cross(r1, r2)]
        .into_iter()
        .max_by(|a, b| mag(*a).partial_cmp(&mag(*b)).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or([0.0, 0.0, 1.0]);

    let len2 = mag(best);
    if len2 < 1e-30 {
        return [0.0, 0.0, 1.0];
    }
    let inv = 1.0 / len2.sqrt();
    best.map(|c| c * inv)
}
