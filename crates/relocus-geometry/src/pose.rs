//! Poses attached to a coordinate origin, possibly through other poses.

use relocus_types::{LocError, OriginId};
use serde::{Deserialize, Serialize};

use crate::transform::{Transform3D, Vec3};

/// What a [`Pose`]'s transform is expressed relative to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseParent {
    Origin(OriginId),
    Pose(Box<Pose>),
}

/// A rigid transform plus the frame it is expressed in.
///
/// A pose whose parent is an origin is *flattened*. Chains of pose parents
/// are collapsed with [`Pose::with_respect_to_origin`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub transform: Transform3D,
    pub parent: PoseParent,
}

impl Pose {
    /// A flattened pose directly under `origin`.
    pub fn new(transform: Transform3D, origin: OriginId) -> Self {
        Self {
            transform,
            parent: PoseParent::Origin(origin),
        }
    }

    pub fn identity(origin: OriginId) -> Self {
        Self::new(Transform3D::identity(), origin)
    }

    pub fn planar(x: f32, y: f32, z: f32, heading_rad: f32, origin: OriginId) -> Self {
        Self::new(Transform3D::planar(x, y, z, heading_rad), origin)
    }

    /// A pose expressed relative to another pose.
    pub fn with_parent(transform: Transform3D, parent: Pose) -> Self {
        Self {
            transform,
            parent: PoseParent::Pose(Box::new(parent)),
        }
    }

    pub fn is_flattened(&self) -> bool {
        matches!(self.parent, PoseParent::Origin(_))
    }

    /// The origin at the end of the parent chain.
    pub fn origin(&self) -> OriginId {
        let mut current = self;
        loop {
            match &current.parent {
                PoseParent::Origin(id) => return *id,
                PoseParent::Pose(p) => current = p,
            }
        }
    }

    /// Collapse the parent chain into a single transform under [`Pose::origin`].
    pub fn with_respect_to_origin(&self) -> Pose {
        match &self.parent {
            PoseParent::Origin(_) => self.clone(),
            PoseParent::Pose(parent) => {
                let base = parent.with_respect_to_origin();
                Pose::new(base.transform.compose(self.transform), base.origin())
            }
        }
    }

    /// This pose expressed in the frame of `other`.
    ///
    /// Both poses must end in the same origin.
    pub fn relative_to(&self, other: &Pose) -> Result<Transform3D, LocError> {
        let me = self.with_respect_to_origin();
        let them = other.with_respect_to_origin();
        if me.origin() != them.origin() {
            return Err(LocError::OriginMismatch(me.origin(), them.origin()));
        }
        Ok(them.transform.inverse().compose(me.transform))
    }

    pub fn translation(&self) -> Vec3 {
        self.transform.translation
    }

    pub fn heading(&self) -> f32 {
        self.transform.heading()
    }

    /// Same parent, new transform.
    pub fn with_transform(&self, transform: Transform3D) -> Pose {
        Pose {
            transform,
            parent: self.parent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const ORIGIN: OriginId = OriginId(1);

    #[test]
    fn flattened_pose_reports_its_origin() {
        let p = Pose::planar(1.0, 2.0, 0.0, 0.0, ORIGIN);
        assert!(p.is_flattened());
        assert_eq!(p.origin(), ORIGIN);
    }

    #[test]
    fn nested_pose_collapses_to_origin() {
        let landmark = Pose::planar(100.0, 0.0, 0.0, FRAC_PI_2, ORIGIN);
        let robot = Pose::with_parent(Transform3D::planar(-50.0, 0.0, 0.0, 0.0), landmark);
        assert!(!robot.is_flattened());
        assert_eq!(robot.origin(), ORIGIN);

        let flat = robot.with_respect_to_origin();
        assert!(flat.is_flattened());
        assert!((flat.translation().x - 100.0).abs() < 1e-4);
        assert!((flat.translation().y + 50.0).abs() < 1e-4);
        assert!((flat.heading() - FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn relative_to_requires_common_origin() {
        let a = Pose::identity(ORIGIN);
        let b = Pose::identity(OriginId(2));
        assert_eq!(
            a.relative_to(&b),
            Err(LocError::OriginMismatch(ORIGIN, OriginId(2)))
        );
    }

    #[test]
    fn relative_to_inverts_parent_chain() {
        let landmark = Pose::planar(100.0, 20.0, 0.0, 0.3, ORIGIN);
        let rel = Transform3D::planar(-40.0, 5.0, 0.0, -0.1);
        let robot = Pose::with_parent(rel, landmark.clone());
        let back = robot.relative_to(&landmark).unwrap();
        assert!(back.is_near(rel, 1e-3, 1e-5));
    }

    #[test]
    fn pose_serializes_with_nested_parent() {
        let p = Pose::with_parent(Transform3D::identity(), Pose::identity(ORIGIN));
        let json = serde_json::to_string(&p).unwrap();
        let back: Pose = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
