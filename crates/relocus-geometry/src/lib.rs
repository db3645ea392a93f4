//! `relocus-geometry` – rigid transforms, rooted poses and the origin registry.
//!
//! # Modules
//!
//! - [`transform`] – [`Transform3D`][transform::Transform3D]: translation plus
//!   unit-quaternion rotation, with composition and inversion.
//! - [`pose`] – [`Pose`][pose::Pose]: a transform attached either directly to
//!   an origin (flattened) or to another pose.
//! - [`origins`] – [`OriginRegistry`][origins::OriginRegistry]: the set of
//!   coordinate origins, able to re-parent ("rejigger") one origin under
//!   another and collapse the resulting chains.

pub mod origins;
pub mod pose;
pub mod transform;

pub use origins::{OriginRegistry, PoseOriginList};
pub use pose::{Pose, PoseParent};
pub use transform::{Quaternion, Transform3D, Vec3};
