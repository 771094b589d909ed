//! Geometry primitives shared by the perception modules.
//!
//! # Example
//!
//! ```rust
//! use objloc_perception::geometry::{Quaternion, Vec3};
//!
//! let a = Vec3::new(0.0, 0.0, 0.0);
//! let b = Vec3::new(2.0, 2.0, 2.0);
//! assert_eq!(a.midpoint(b), Vec3::new(1.0, 1.0, 1.0));
//!
//! // Rotation that carries +Z onto +X.
//! let q = Quaternion::rotation_between(Vec3::unit_z(), Vec3::new(1.0, 0.0, 0.0));
//! let r = q.rotate(Vec3::unit_z());
//! assert!((r.x - 1.0).abs() < 1e-5);
//! ```

use objloc_types::{CloudPoint, Position, Rotation};
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector or point (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn unit_z() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn norm(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn normalized(self) -> Option<Self> {
        let n = self.norm();
        if n < 1e-9 || !n.is_finite() {
            return None;
        }
        Some(self.scale(1.0 / n))
    }

    /// Arithmetic midpoint of `self` and `other`.
    pub fn midpoint(self, other: Self) -> Self {
        Self::new(
            (self.x + other.x) * 0.5,
            (self.y + other.y) * 0.5,
            (self.z + other.z) * 0.5,
        )
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<CloudPoint> for Vec3 {
    fn from(p: CloudPoint) -> Self {
        Self::new(p.x, p.y, p.z)
    }
}

impl From<Vec3> for Position {
    fn from(v: Vec3) -> Self {
        Position::new(v.x, v.y, v.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// Create a quaternion. The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn norm(self) -> f32 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Shortest-arc rotation carrying direction `from` onto direction `to`.
    ///
    /// Both inputs are normalized first; zero vectors yield the identity.
    pub fn rotation_between(from: Vec3, to: Vec3) -> Self {
        let (Some(a), Some(b)) = (from.normalized(), to.normalized()) else {
            return Self::identity();
        };
        let d = a.dot(b);
        if d < -1.0 + 1e-6 {
            // Antiparallel: half turn about any axis orthogonal to `a`.
            let axis = a
                .cross(Vec3::new(1.0, 0.0, 0.0))
                .normalized()
                .or_else(|| a.cross(Vec3::new(0.0, 1.0, 0.0)).normalized())
                .unwrap_or(Vec3::new(0.0, 0.0, 1.0));
            return Self::new(0.0, axis.x, axis.y, axis.z);
        }
        let c = a.cross(b);
        let q = Self::new(1.0 + d, c.x, c.y, c.z);
        let n = q.norm();
        Self::new(q.w / n, q.x / n, q.y / n, q.z / n)
    }
}

impl From<Quaternion> for Rotation {
    fn from(q: Quaternion) -> Self {
        Rotation {
            w: q.w,
            x: q.x,
            y: q.y,
            z: q.z,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_1_SQRT_2;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a.x - b.x).abs() < 1e-5 && (a.y - b.y).abs() < 1e-5 && (a.z - b.z).abs() < 1e-5
    }

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(close(r, Vec3::new(0.0, 1.0, 0.0)), "got {r:?}");
    }

    #[test]
    fn rotation_between_maps_source_onto_target() {
        let target = Vec3::new(0.3, -0.4, 0.866);
        let q = Quaternion::rotation_between(Vec3::unit_z(), target);
        assert!((q.norm() - 1.0).abs() < 1e-5);
        let r = q.rotate(Vec3::unit_z());
        assert!(close(r, target.normalized().unwrap()), "got {r:?}");
    }

    #[test]
    fn rotation_between_identical_directions_is_identity() {
        let q = Quaternion::rotation_between(Vec3::unit_z(), Vec3::new(0.0, 0.0, 5.0));
        assert!((q.w - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rotation_between_opposite_directions_is_half_turn() {
        let q = Quaternion::rotation_between(Vec3::unit_z(), Vec3::new(0.0, 0.0, -1.0));
        let r = q.rotate(Vec3::unit_z());
        assert!(close(r, Vec3::new(0.0, 0.0, -1.0)), "got {r:?}");
    }

    #[test]
    fn midpoint_and_normalize() {
        let m = Vec3::new(-1.0, 4.0, 2.0).midpoint(Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(m, Vec3::new(0.0, 2.0, 2.0));
        assert!(Vec3::zero().normalized().is_none());
    }
}
