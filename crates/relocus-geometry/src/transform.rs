//! Rigid-body transforms.
//!
//! A [`Transform3D`] maps points from a child frame into its parent frame:
//! rotate by `rotation`, then add `translation`. Robot poses only ever rotate
//! about Z, so [`Transform3D::planar`] and [`Transform3D::heading`] cover the
//! common case.
//!
//! # Example
//!
//! ```rust
//! use relocus_geometry::transform::Transform3D;
//! use std::f32::consts::FRAC_PI_2;
//!
//! // Robot 100 mm along X, facing +Y.
//! let robot = Transform3D::planar(100.0, 0.0, 0.0, FRAC_PI_2);
//! // Drive 10 mm forward in the robot frame.
//! let step = Transform3D::planar(10.0, 0.0, 0.0, 0.0);
//!
//! let moved = robot.compose(step);
//! assert!((moved.translation.x - 100.0).abs() < 1e-4);
//! assert!((moved.translation.y - 10.0).abs() < 1e-4);
//! ```

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector, in millimetres.
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

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn neg(self) -> Self {
        self.scale(-1.0)
    }

    pub fn length_sq(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// The caller is responsible for providing a unit quaternion.
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle_rad` about the Z axis.
    pub fn from_yaw(angle_rad: f32) -> Self {
        let half = angle_rad * 0.5;
        Self::new(half.cos(), 0.0, 0.0, half.sin())
    }

    /// Rotation about Z, in `(-π, π]`.
    pub fn yaw(self) -> f32 {
        let siny = 2.0 * (self.w * self.z + self.x * self.y);
        let cosy = 1.0 - 2.0 * (self.y * self.y + self.z * self.z);
        siny.atan2(cosy)
    }

    /// Hamilton product.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }
}

/// Wrap an angle into `(-π, π]`.
pub fn normalize_angle(angle_rad: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let mut a = angle_rad % TAU;
    if a <= -PI {
        a += TAU;
    } else if a > PI {
        a -= TAU;
    }
    a
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Translation `(x, y, z)` with a rotation of `heading_rad` about Z.
    pub fn planar(x: f32, y: f32, z: f32, heading_rad: f32) -> Self {
        Self::new(Vec3::new(x, y, z), Quaternion::from_yaw(heading_rad))
    }

    /// Compose two transforms.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// T_B_A from T_A_B.
    pub fn inverse(self) -> Self {
        let rotation = self.rotation.conjugate();
        Self::new(rotation.rotate(self.translation.neg()), rotation)
    }

    pub fn heading(self) -> f32 {
        self.rotation.yaw()
    }

    pub fn with_z(self, z: f32) -> Self {
        Self::new(Vec3::new(self.translation.x, self.translation.y, z), self.rotation)
    }

    /// Component-wise closeness check on translation and heading.
    pub fn is_near(self, other: Self, dist_tol: f32, angle_tol: f32) -> bool {
        self.translation.sub(other.translation).length_sq() <= dist_tol * dist_tol
            && normalize_angle(self.heading() - other.heading()).abs() <= angle_tol
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_2, PI};

    // ── Quaternion ──────────────────────────────────────────────────────────

    #[test]
    fn quaternion_from_yaw_matches_half_angle_form() {
        let q = Quaternion::from_yaw(FRAC_PI_2);
        assert!((q.w - FRAC_1_SQRT_2).abs() < 1e-5);
        assert!((q.z - FRAC_1_SQRT_2).abs() < 1e-5);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(r.x.abs() < 1e-5, "x should be ~0, got {}", r.x);
        assert!((r.y - 1.0).abs() < 1e-5, "y should be ~1, got {}", r.y);
    }

    #[test]
    fn quaternion_yaw_recovers_angle() {
        for angle in [-2.5_f32, -0.3, 0.0, 0.7, 3.0] {
            let q = Quaternion::from_yaw(angle);
            assert!((q.yaw() - angle).abs() < 1e-5, "angle {angle}");
        }
    }

    #[test]
    fn normalize_angle_wraps_into_range() {
        assert!((normalize_angle(2.5 * PI) - FRAC_PI_2).abs() < 1e-4);
        assert!((normalize_angle(-FRAC_PI_2 - 2.0 * PI) + FRAC_PI_2).abs() < 1e-4);
        assert!((normalize_angle(0.25) - 0.25).abs() < 1e-6);
    }

    // ── Transform3D ─────────────────────────────────────────────────────────

    #[test]
    fn transform_compose_translations_add() {
        let t1 = Transform3D::planar(1.0, 0.0, 0.0, 0.0);
        let t2 = Transform3D::planar(2.0, 0.0, 0.0, 0.0);
        let composed = t1.compose(t2);
        assert!((composed.translation.x - 3.0).abs() < 1e-5);
    }

    #[test]
    fn transform_compose_respects_rotation() {
        let base = Transform3D::planar(0.0, 0.0, 0.0, FRAC_PI_2);
        let forward = Transform3D::planar(1.0, 0.0, 0.0, 0.0);
        let t = base.compose(forward);
        assert!(t.translation.x.abs() < 1e-5, "x={}", t.translation.x);
        assert!((t.translation.y - 1.0).abs() < 1e-5, "y={}", t.translation.y);
        assert!((t.heading() - FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn transform_inverse_composes_to_identity() {
        let t = Transform3D::planar(12.0, -4.0, 3.0, 0.8);
        let id = t.compose(t.inverse());
        assert!(id.is_near(Transform3D::identity(), 1e-4, 1e-5));
        let id2 = t.inverse().compose(t);
        assert!(id2.is_near(Transform3D::identity(), 1e-4, 1e-5));
    }

    #[test]
    fn relative_transform_between_poses() {
        let a = Transform3D::planar(10.0, 0.0, 0.0, FRAC_PI_2);
        let b = Transform3D::planar(10.0, 5.0, 0.0, FRAC_PI_2);
        // b expressed in a's frame: 5 mm straight ahead.
        let rel = a.inverse().compose(b);
        assert!((rel.translation.x - 5.0).abs() < 1e-4);
        assert!(rel.translation.y.abs() < 1e-4);
        assert!(rel.heading().abs() < 1e-5);
    }

    #[test]
    fn with_z_only_touches_height() {
        let t = Transform3D::planar(1.0, 2.0, 3.0, 0.4).with_z(9.0);
        assert!((t.translation.z - 9.0).abs() < 1e-6);
        assert!((t.translation.y - 2.0).abs() < 1e-6);
        assert!((t.heading() - 0.4).abs() < 1e-5);
    }
}
