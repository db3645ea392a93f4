//! Forward projection of a keyframe through raw odometry.
//!
//! Raw odometry between a vision keyframe and a query time may span several
//! frame epochs: each time the firmware accepted a correction, its reported
//! poses jumped. Within one epoch, consecutive samples are mutually
//! consistent, so the motion across an epoch segment is the relative
//! transform between its first and last samples. Chaining those per-segment
//! motions gives the total motion since the keyframe, free of the jumps.

use relocus_geometry::Transform3D;
use relocus_types::{LocError, TimeStamp};

use crate::state::HistRobotState;

fn segment_motion(start: &HistRobotState, end: &HistRobotState) -> Result<Transform3D, LocError> {
    end.pose().relative_to(start.pose())
}

/// Total motion from the first of `samples` to `end`.
///
/// `samples` must be in time order and cover the keyframe time up to (and
/// possibly including) the time of `end`. An empty range yields identity.
pub fn project_forward<'a, I>(samples: I, end: &HistRobotState) -> Result<Transform3D, LocError>
where
    I: IntoIterator<Item = (&'a TimeStamp, &'a HistRobotState)>,
{
    let mut total = Transform3D::identity();
    let mut segment: Option<(&HistRobotState, &HistRobotState)> = None;

    for (_, state) in samples {
        segment = match segment {
            None => Some((state, state)),
            Some((start, _)) if start.frame_epoch() == state.frame_epoch() => Some((start, state)),
            Some((start, last)) => {
                total = total.compose(segment_motion(start, last)?);
                Some((state, state))
            }
        };
    }

    if let Some((start, last)) = segment {
        let close = if start.frame_epoch() == end.frame_epoch() {
            end
        } else {
            last
        };
        total = total.compose(segment_motion(start, close)?);
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relocus_geometry::Pose;
    use relocus_types::{FrameEpoch, OriginId};
    use std::collections::BTreeMap;
    use std::f32::consts::FRAC_PI_2;

    fn raw(x: f32, y: f32, heading: f32, epoch: FrameEpoch) -> HistRobotState {
        HistRobotState::keyframe(epoch, Pose::planar(x, y, 0.0, heading, OriginId(1)), 0.0, 0.0)
    }

    #[test]
    fn empty_range_is_identity() {
        let end = raw(5.0, 0.0, 0.0, 1);
        let t = project_forward(std::iter::empty(), &end).unwrap();
        assert_eq!(t, Transform3D::identity());
    }

    #[test]
    fn single_epoch_is_relative_transform() {
        let mut states = BTreeMap::new();
        states.insert(0, raw(10.0, 0.0, FRAC_PI_2, 1));
        states.insert(10, raw(10.0, 4.0, FRAC_PI_2, 1));
        let end = states[&10].clone();
        let t = project_forward(&states, &end).unwrap();
        // 4 mm along +Y in world is 4 mm straight ahead for a robot facing +Y.
        assert!((t.translation.x - 4.0).abs() < 1e-4);
        assert!(t.translation.y.abs() < 1e-4);
    }

    #[test]
    fn epoch_jumps_are_skipped() {
        let mut states = BTreeMap::new();
        states.insert(0, raw(0.0, 0.0, 0.0, 1));
        states.insert(10, raw(5.0, 0.0, 0.0, 1));
        // Firmware applied a correction: pose jumps to 500.
        states.insert(20, raw(500.0, 0.0, 0.0, 2));
        states.insert(30, raw(503.0, 0.0, 0.0, 2));
        let end = states[&30].clone();
        let t = project_forward(&states, &end).unwrap();
        assert!((t.translation.x - 8.0).abs() < 1e-4, "x={}", t.translation.x);
    }

    #[test]
    fn interpolated_end_closes_last_segment() {
        let mut states = BTreeMap::new();
        states.insert(0, raw(0.0, 0.0, 0.0, 1));
        states.insert(10, raw(2.0, 0.0, 0.0, 1));
        let end = raw(3.0, 0.0, 0.0, 1);
        let t = project_forward(&states, &end).unwrap();
        assert!((t.translation.x - 3.0).abs() < 1e-4);
    }

    #[test]
    fn mixed_origins_within_segment_fail() {
        let mut states = BTreeMap::new();
        states.insert(0, raw(0.0, 0.0, 0.0, 1));
        let end = HistRobotState::keyframe(1, Pose::identity(OriginId(2)), 0.0, 0.0);
        assert!(matches!(
            project_forward(&states, &end),
            Err(LocError::OriginMismatch(_, _))
        ));
    }
}
