//! JSON-lines replay scripts.
//!
//! One command per line, tagged by `cmd`. Blank lines and lines starting with
//! `#` are skipped. Poses are written in planar form:
//!
//! ```text
//! {"cmd": "odometry", "msg": {"timestamp": 10, "origin_id": 1, "pose": {"x": 5.0}}}
//! {"cmd": "observe", "observation": {"timestamp": 10, "pose": {"x": 60.0, "origin": 1}},
//!  "landmark": {"id": 3, "pose": {"x": 500.0, "y": 200.0, "origin": 1}}}
//! {"cmd": "sync_ack"}
//! {"cmd": "flush"}
//! ```

use relocus_geometry::Pose;
use relocus_runtime::{Landmark, LandmarkObservation, Marker};
use relocus_types::{LandmarkId, OriginId, RobotStateMessage, TimeStamp};
use serde::{Deserialize, Serialize};

/// A pose on the ground plane, directly under `origin`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanarPose {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    #[serde(default)]
    pub heading_rad: f32,
    pub origin: OriginId,
}

impl PlanarPose {
    pub fn to_pose(self) -> Pose {
        Pose::planar(self.x, self.y, self.z, self.heading_rad, self.origin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSpec {
    pub pose: PlanarPose,
    #[serde(default)]
    pub last_observed: TimeStamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSpec {
    #[serde(default)]
    pub id: Option<u32>,
    pub pose: PlanarPose,
    #[serde(default)]
    pub markers: Vec<MarkerSpec>,
}

impl LandmarkSpec {
    pub fn to_landmark(&self) -> Landmark {
        Landmark {
            id: self.id.map(LandmarkId),
            pose: self.pose.to_pose(),
            markers: self
                .markers
                .iter()
                .map(|m| Marker {
                    pose: m.pose.to_pose(),
                    last_observed: m.last_observed,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSpec {
    pub timestamp: TimeStamp,
    pub pose: PlanarPose,
}

impl ObservationSpec {
    pub fn to_observation(&self) -> LandmarkObservation {
        LandmarkObservation {
            timestamp: self.timestamp,
            observed_pose: self.pose.to_pose(),
        }
    }
}

/// One line of a replay script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ScriptCommand {
    /// Feed a firmware state message.
    Odometry { msg: RobotStateMessage },
    /// Relocalize against a landmark, optionally at an observation time.
    Observe {
        #[serde(default)]
        observation: Option<ObservationSpec>,
        landmark: Option<LandmarkSpec>,
    },
    /// Mark localized to a landmark, or to odometry when none is given.
    Localize {
        #[serde(default)]
        landmark: Option<LandmarkSpec>,
    },
    Delocalize {
        #[serde(default)]
        carrying: bool,
    },
    SetPose { pose: PlanarPose },
    BeginSync,
    SyncAck,
    /// Send any pending localization update.
    Flush,
}

/// Parse a whole script. Each command is paired with its 1-based line number.
pub fn parse_script(text: &str) -> Result<Vec<(usize, ScriptCommand)>, String> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map(|cmd| (n, cmd))
                .map_err(|e| format!("line {}: {}", n, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command_and_skips_comments() {
        let text = r#"
# warm-up
{"cmd": "odometry", "msg": {"timestamp": 10, "origin_id": 1, "pose": {"x": 5.0}}}
{"cmd": "observe", "observation": {"timestamp": 10, "pose": {"x": 60.0, "origin": 1}}, "landmark": {"id": 3, "pose": {"x": 500.0, "origin": 1}}}
{"cmd": "localize"}
{"cmd": "delocalize", "carrying": true}
{"cmd": "set_pose", "pose": {"x": 1.0, "origin": 2}}
{"cmd": "begin_sync"}
{"cmd": "sync_ack"}
{"cmd": "flush"}
"#;
        let commands = parse_script(text).unwrap();
        assert_eq!(commands.len(), 8);
        assert_eq!(commands[0].0, 3);
        assert!(matches!(
            &commands[0].1,
            ScriptCommand::Odometry { msg } if msg.timestamp == 10 && msg.origin_id == OriginId(1)
        ));
        assert!(matches!(commands[2].1, ScriptCommand::Localize { landmark: None }));
        assert_eq!(commands[3].1, ScriptCommand::Delocalize { carrying: true });
        assert_eq!(commands[7].1, ScriptCommand::Flush);
    }

    #[test]
    fn bad_line_reports_its_number() {
        let err = parse_script("{\"cmd\": \"flush\"}\n{\"cmd\": \"teleport\"}").unwrap_err();
        assert!(err.starts_with("line 2:"), "{err}");
    }

    #[test]
    fn landmark_spec_builds_markers() {
        let spec: LandmarkSpec = serde_json::from_str(
            r#"{"id": 9, "pose": {"x": 10.0, "origin": 1},
                "markers": [{"pose": {"x": 12.0, "origin": 1}, "last_observed": 40}]}"#,
        )
        .unwrap();
        let landmark = spec.to_landmark();
        assert_eq!(landmark.id, Some(LandmarkId(9)));
        assert_eq!(landmark.markers.len(), 1);
        assert_eq!(landmark.markers[0].last_observed, 40);
        assert!((landmark.pose.translation().x - 10.0).abs() < 1e-6);
    }
}
