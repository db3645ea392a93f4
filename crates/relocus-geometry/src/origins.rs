//! Origin registry.
//!
//! Every pose in the system ultimately hangs off an *origin*. When the robot
//! recognises a landmark that lives in a different origin, the current origin
//! is re-parented under the landmark's one (a *rejigger*) and then every chain
//! under that root is collapsed back to depth one (a *flatten*), so lookups
//! never walk more than a single link.
//!
//! # Example
//!
//! ```rust
//! use relocus_geometry::{OriginRegistry, PoseOriginList, Pose, Transform3D};
//!
//! let mut origins = PoseOriginList::new();
//! let old = origins.add_new_origin();
//! let new = origins.add_new_origin();
//!
//! origins.rejigger(old, new, Transform3D::planar(100.0, 0.0, 0.0, 0.0)).unwrap();
//! origins.flatten(new).unwrap();
//!
//! let p = origins.flatten_pose(&Pose::planar(5.0, 0.0, 0.0, 0.0, old)).unwrap();
//! assert_eq!(p.origin(), new);
//! assert!((p.translation().x - 105.0).abs() < 1e-4);
//! ```

use relocus_types::{LocError, OriginId};
use tracing::debug;

use crate::pose::Pose;
use crate::transform::Transform3D;

// ────────────────────────────────────────────────────────────────────────────
// OriginRegistry trait
// ────────────────────────────────────────────────────────────────────────────

/// The registry the localization core consults when origins change.
pub trait OriginRegistry: Send {
    /// Register a fresh root origin and return its id.
    fn add_new_origin(&mut self) -> OriginId;

    fn contains(&self, id: OriginId) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct parent of `id`, `None` for a root.
    fn parent_of(&self, id: OriginId) -> Result<Option<OriginId>, LocError>;

    fn is_root(&self, id: OriginId) -> bool {
        matches!(self.parent_of(id), Ok(None))
    }

    /// The root above `id` and the composed transform from `id` into it.
    fn root_transform(&self, id: OriginId) -> Result<(OriginId, Transform3D), LocError>;

    /// Re-express root origin `origin` under root origin `new_parent`.
    ///
    /// `transform` maps points in `origin` into `new_parent`.
    fn rejigger(
        &mut self,
        origin: OriginId,
        new_parent: OriginId,
        transform: Transform3D,
    ) -> Result<(), LocError>;

    /// Link every descendant of `root` directly to it. Returns how many links
    /// were rewritten.
    fn flatten(&mut self, root: OriginId) -> Result<usize, LocError>;

    /// Express `pose` as a flattened pose directly under its root origin.
    fn flatten_pose(&self, pose: &Pose) -> Result<Pose, LocError> {
        let local = pose.with_respect_to_origin();
        let (root, to_root) = self.root_transform(local.origin())?;
        Ok(Pose::new(to_root.compose(local.transform), root))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PoseOriginList
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct OriginEntry {
    parent: Option<(OriginId, Transform3D)>,
}

/// Arena-backed [`OriginRegistry`]. Ids start at 1; [`OriginId::UNKNOWN`] is
/// never handed out.
#[derive(Debug, Clone, Default)]
pub struct PoseOriginList {
    entries: Vec<OriginEntry>,
}

impl PoseOriginList {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: OriginId) -> Result<&OriginEntry, LocError> {
        if id.is_unknown() {
            return Err(LocError::UnknownOrigin(id));
        }
        self.entries
            .get(id.0 as usize - 1)
            .ok_or(LocError::UnknownOrigin(id))
    }

    fn entry_mut(&mut self, id: OriginId) -> Result<&mut OriginEntry, LocError> {
        if id.is_unknown() {
            return Err(LocError::UnknownOrigin(id));
        }
        self.entries
            .get_mut(id.0 as usize - 1)
            .ok_or(LocError::UnknownOrigin(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = OriginId> + '_ {
        (1..=self.entries.len() as u32).map(OriginId)
    }
}

impl OriginRegistry for PoseOriginList {
    fn add_new_origin(&mut self) -> OriginId {
        self.entries.push(OriginEntry::default());
        let id = OriginId(self.entries.len() as u32);
        debug!(origin = %id, "added origin");
        id
    }

    fn contains(&self, id: OriginId) -> bool {
        self.entry(id).is_ok()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn parent_of(&self, id: OriginId) -> Result<Option<OriginId>, LocError> {
        Ok(self.entry(id)?.parent.map(|(p, _)| p))
    }

    fn root_transform(&self, id: OriginId) -> Result<(OriginId, Transform3D), LocError> {
        let mut current = id;
        let mut accumulated = Transform3D::identity();
        // A well-formed forest never has a chain longer than its size.
        for _ in 0..=self.entries.len() {
            match self.entry(current)?.parent {
                None => return Ok((current, accumulated)),
                Some((parent, link)) => {
                    accumulated = link.compose(accumulated);
                    current = parent;
                }
            }
        }
        Err(LocError::InvalidRejigger {
            origin: id,
            new_parent: current,
        })
    }

    fn rejigger(
        &mut self,
        origin: OriginId,
        new_parent: OriginId,
        transform: Transform3D,
    ) -> Result<(), LocError> {
        let invalid = LocError::InvalidRejigger { origin, new_parent };
        if origin == new_parent {
            return Err(invalid);
        }
        if self.parent_of(new_parent)?.is_some() || self.parent_of(origin)?.is_some() {
            return Err(invalid);
        }
        self.entry_mut(origin)?.parent = Some((new_parent, transform));
        debug!(origin = %origin, new_parent = %new_parent, "rejiggered origin");
        Ok(())
    }

    fn flatten(&mut self, root: OriginId) -> Result<usize, LocError> {
        self.entry(root)?;
        let mut relinked = Vec::new();
        for id in self.ids() {
            let Some((parent, _)) = self.entry(id)?.parent else {
                continue;
            };
            if parent == root {
                continue;
            }
            let (found_root, to_root) = self.root_transform(id)?;
            if found_root == root {
                relinked.push((id, to_root));
            }
        }
        let count = relinked.len();
        for (id, to_root) in relinked {
            self.entry_mut(id)?.parent = Some((root, to_root));
        }
        debug!(root = %root, relinked = count, "flattened origins");
        Ok(count)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn new_origins_are_roots_with_increasing_ids() {
        let mut origins = PoseOriginList::new();
        let a = origins.add_new_origin();
        let b = origins.add_new_origin();
        assert_eq!(a, OriginId(1));
        assert_eq!(b, OriginId(2));
        assert!(origins.is_root(a));
        assert!(origins.is_root(b));
        assert_eq!(origins.len(), 2);
    }

    #[test]
    fn unknown_origin_is_rejected() {
        let origins = PoseOriginList::new();
        assert!(!origins.contains(OriginId::UNKNOWN));
        assert!(!origins.contains(OriginId(7)));
        assert_eq!(
            origins.root_transform(OriginId(7)),
            Err(LocError::UnknownOrigin(OriginId(7)))
        );
    }

    #[test]
    fn rejigger_requires_distinct_roots() {
        let mut origins = PoseOriginList::new();
        let a = origins.add_new_origin();
        let b = origins.add_new_origin();
        let c = origins.add_new_origin();

        assert!(origins.rejigger(a, a, Transform3D::identity()).is_err());
        origins.rejigger(a, b, Transform3D::identity()).unwrap();
        // `a` is no longer a root.
        assert!(origins.rejigger(a, c, Transform3D::identity()).is_err());
        assert!(origins.rejigger(c, a, Transform3D::identity()).is_err());
    }

    #[test]
    fn flatten_pose_applies_rejigger_transform() {
        let mut origins = PoseOriginList::new();
        let old = origins.add_new_origin();
        let new = origins.add_new_origin();
        origins
            .rejigger(old, new, Transform3D::planar(10.0, 0.0, 0.0, FRAC_PI_2))
            .unwrap();

        let p = origins
            .flatten_pose(&Pose::planar(1.0, 0.0, 0.0, 0.0, old))
            .unwrap();
        assert_eq!(p.origin(), new);
        assert!((p.translation().x - 10.0).abs() < 1e-4);
        assert!((p.translation().y - 1.0).abs() < 1e-4);
        assert!((p.heading() - FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn flatten_collapses_chains_to_depth_one() {
        let mut origins = PoseOriginList::new();
        let a = origins.add_new_origin();
        let b = origins.add_new_origin();
        let c = origins.add_new_origin();

        origins
            .rejigger(a, b, Transform3D::planar(1.0, 0.0, 0.0, 0.0))
            .unwrap();
        origins
            .rejigger(b, c, Transform3D::planar(2.0, 0.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(origins.parent_of(a).unwrap(), Some(b));

        let relinked = origins.flatten(c).unwrap();
        assert_eq!(relinked, 1);
        assert_eq!(origins.parent_of(a).unwrap(), Some(c));
        assert_eq!(origins.parent_of(b).unwrap(), Some(c));

        let (root, t) = origins.root_transform(a).unwrap();
        assert_eq!(root, c);
        assert!((t.translation.x - 3.0).abs() < 1e-5);
    }

    #[test]
    fn flatten_leaves_other_trees_alone() {
        let mut origins = PoseOriginList::new();
        let a = origins.add_new_origin();
        let b = origins.add_new_origin();
        let lonely = origins.add_new_origin();
        origins.rejigger(a, b, Transform3D::identity()).unwrap();

        assert_eq!(origins.flatten(lonely).unwrap(), 0);
        assert_eq!(origins.parent_of(a).unwrap(), Some(b));
    }

    #[test]
    fn flatten_pose_collapses_nested_pose_chain() {
        let mut origins = PoseOriginList::new();
        let o = origins.add_new_origin();
        let landmark = Pose::planar(50.0, 0.0, 0.0, 0.0, o);
        let robot = Pose::with_parent(Transform3D::planar(-10.0, 0.0, 0.0, 0.0), landmark);
        let flat = origins.flatten_pose(&robot).unwrap();
        assert!(flat.is_flattened());
        assert!((flat.translation().x - 40.0).abs() < 1e-4);
    }
}
