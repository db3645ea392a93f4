//! Landmarks the robot can localize against, and observations of them.

use relocus_geometry::Pose;
use relocus_types::{LandmarkId, TimeStamp};
use serde::{Deserialize, Serialize};

/// A visually identifiable feature on a landmark (a fiducial, a face of a cube…).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub pose: Pose,
    /// When this marker was last seen, `0` if never.
    #[serde(default)]
    pub last_observed: TimeStamp,
}

/// The world model's record of a landmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// `None` for records that do not have a stable identity yet.
    pub id: Option<LandmarkId>,
    pub pose: Pose,
    #[serde(default)]
    pub markers: Vec<Marker>,
}

impl Landmark {
    pub fn new(id: LandmarkId, pose: Pose) -> Self {
        Self {
            id: Some(id),
            pose,
            markers: Vec::new(),
        }
    }

    pub fn with_marker(mut self, pose: Pose, last_observed: TimeStamp) -> Self {
        self.markers.push(Marker {
            pose,
            last_observed,
        });
        self
    }

    /// Markers observed at the most recent observation time.
    pub fn most_recently_observed_markers(&self) -> impl Iterator<Item = &Marker> {
        let latest = self.markers.iter().map(|m| m.last_observed).max();
        self.markers
            .iter()
            .filter(move |m| Some(m.last_observed) == latest)
    }
}

/// A fresh sighting of a landmark, as reported by perception.
///
/// `observed_pose` is where the landmark appeared to be at `timestamp`,
/// expressed in the robot's origin as it stood then.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkObservation {
    pub timestamp: TimeStamp,
    pub observed_pose: Pose,
}

#[cfg(test)]
mod tests {
    use super::*;
    use relocus_types::OriginId;

    #[test]
    fn most_recent_markers_share_latest_timestamp() {
        let o = OriginId(1);
        let lm = Landmark::new(LandmarkId(7), Pose::identity(o))
            .with_marker(Pose::planar(1.0, 0.0, 0.0, 0.0, o), 10)
            .with_marker(Pose::planar(2.0, 0.0, 0.0, 0.0, o), 30)
            .with_marker(Pose::planar(3.0, 0.0, 0.0, 0.0, o), 30);
        let recent: Vec<_> = lm.most_recently_observed_markers().collect();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|m| m.last_observed == 30));
    }

    #[test]
    fn landmark_without_markers_has_no_recent_ones() {
        let lm = Landmark::new(LandmarkId(1), Pose::identity(OriginId(1)));
        assert_eq!(lm.most_recently_observed_markers().count(), 0);
    }
}
