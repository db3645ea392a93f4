use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Robot clock time in milliseconds.
pub type TimeStamp = u32;

/// Generation counter of the robot's coordinate frame. Incremented on every
/// committed absolute pose correction.
pub type FrameEpoch = u32;

/// Handle to a coordinate origin in the origin registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OriginId(pub u32);

impl OriginId {
    /// Reserved id that never names a registered origin.
    pub const UNKNOWN: OriginId = OriginId(0);

    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }
}

impl std::fmt::Display for OriginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "origin#{}", self.0)
    }
}

/// Identifier of a landmark known to the world model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LandmarkId(pub u32);

impl std::fmt::Display for LandmarkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "landmark#{}", self.0)
    }
}

pub const CLIFF_SENSOR_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CliffSensor {
    FrontLeft = 0,
    FrontRight = 1,
    BackLeft = 2,
    BackRight = 3,
}

/// Body contact state reported by the firmware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreadsState {
    #[default]
    OnTreads,
    InAir,
    Falling,
    OnBack,
    OnFace,
    OnSide,
}

impl TreadsState {
    pub fn is_on_treads(self) -> bool {
        self == TreadsState::OnTreads
    }
}

/// Motion and contact flags attached to every odometry sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusFlags {
    pub is_carrying_object: bool,
    pub is_moving: bool,
    pub head_in_position: bool,
    pub lift_in_position: bool,
    pub are_wheels_moving: bool,
    pub is_picked_up: bool,
    pub is_being_held: bool,
    pub is_camera_moving: bool,
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self {
            is_carrying_object: false,
            is_moving: false,
            head_in_position: true,
            lift_in_position: true,
            are_wheels_moving: false,
            is_picked_up: false,
            is_being_held: false,
            is_camera_moving: false,
        }
    }
}

/// One reading of the forward proximity sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxReading {
    pub distance_mm: u16,
    pub signal_quality: f32,
    pub is_in_valid_range: bool,
    pub is_valid_signal_quality: bool,
    pub is_lift_in_fov: bool,
    pub is_too_pitched: bool,
}

/// Planar odometry pose as reported by the firmware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdometryPose {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub heading_rad: f32,
    pub pitch_rad: f32,
}

/// Per-tick state message from the firmware.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotStateMessage {
    pub timestamp: TimeStamp,
    pub frame_epoch: FrameEpoch,
    pub origin_id: OriginId,
    pub pose: OdometryPose,
    pub head_angle_rad: f32,
    pub lift_angle_rad: f32,
    pub status: StatusFlags,
    pub cliff_data_raw: [u16; CLIFF_SENSOR_COUNT],
    /// Bit `i` set means cliff sensor `i` currently detects a cliff.
    pub cliff_detected_flags: u8,
    pub lwheel_speed_mmps: f32,
    pub rwheel_speed_mmps: f32,
    pub prox: ProxReading,
    pub treads_state: TreadsState,
}

/// Absolute pose correction sent down to the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbsoluteLocalizationUpdate {
    pub timestamp: TimeStamp,
    pub frame_epoch: FrameEpoch,
    pub origin_id: OriginId,
    pub x: f32,
    pub y: f32,
    pub heading_rad: f32,
}

/// Announcement that `old_origin` is now expressed under `new_origin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginSubstitution {
    pub old_origin: OriginId,
    pub new_origin: OriginId,
}

/// Unified envelope for everything the localization core emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "relocus-runtime::coordinator"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    LocalizationUpdate(AbsoluteLocalizationUpdate),
    OriginSubstituted(OriginSubstitution),
    Delocalized { new_origin: OriginId },
    /// The carried object now belongs to the origin the robot just left.
    CarriedObjectOriginChanged { old_origin: OriginId },
}

/// Error type shared by every localization crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocError {
    #[error("timestamp {t} is outside the stored history")]
    OutOfRange { t: TimeStamp },

    #[error("samples bracketing {t} have different frame epochs ({before} vs {after})")]
    EpochMismatch {
        t: TimeStamp,
        before: FrameEpoch,
        after: FrameEpoch,
    },

    #[error("poses are expressed in different origins ({0} vs {1})")]
    OriginMismatch(OriginId, OriginId),

    #[error("pose at {t} is not expressed directly in an origin")]
    NonFlattenedPose { t: TimeStamp },

    #[error("a raw state already exists at {t}")]
    DuplicateTimestamp { t: TimeStamp },

    #[error("timestamp {t} is older than the history window (newest {newest})")]
    TooOld { t: TimeStamp, newest: TimeStamp },

    #[error("frame epoch {epoch} at {t} breaks epoch ordering")]
    EpochOutOfOrder { t: TimeStamp, epoch: FrameEpoch },

    #[error("no stored state carries frame epoch {0}")]
    FrameEpochNotFound(FrameEpoch),

    #[error("unknown origin {0}")]
    UnknownOrigin(OriginId),

    #[error("cannot rejigger {origin} under {new_parent}")]
    InvalidRejigger {
        origin: OriginId,
        new_parent: OriginId,
    },

    #[error("no landmark supplied")]
    NoLandmark,

    #[error("landmark has no id")]
    LandmarkWithoutId,

    #[error("robot is not on its treads")]
    OffTreads,

    #[error("no historical state for observation at {t}")]
    HistoricalStateNotFound { t: TimeStamp },

    #[error("frame epoch mismatch persisted for more than {ticks} ticks")]
    PersistentEpochMismatch { ticks: u32 },

    #[error("message frame epoch {epoch} in {origin} no longer matches any stored state")]
    StaleFrame { epoch: FrameEpoch, origin: OriginId },

    #[error("invalid computed state key {0}")]
    InvalidKey(u32),

    #[error("actuator link error: {0}")]
    Link(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_flags_default_has_head_and_lift_in_position() {
        let flags = StatusFlags::default();
        assert!(flags.head_in_position);
        assert!(flags.lift_in_position);
        assert!(!flags.is_moving);
    }

    #[test]
    fn robot_state_message_parses_with_defaults() {
        let json = r#"{"timestamp": 40, "frame_epoch": 2, "origin_id": 3,
                       "pose": {"x": 10.0, "heading_rad": 0.5}}"#;
        let msg: RobotStateMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.timestamp, 40);
        assert_eq!(msg.origin_id, OriginId(3));
        assert!((msg.pose.x - 10.0).abs() < f32::EPSILON);
        assert_eq!(msg.treads_state, TreadsState::OnTreads);
        assert!(msg.status.head_in_position);
    }

    #[test]
    fn treads_state_uses_snake_case() {
        let json = serde_json::to_string(&TreadsState::InAir).unwrap();
        assert_eq!(json, "\"in_air\"");
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "relocus-runtime::coordinator",
            EventPayload::OriginSubstituted(OriginSubstitution {
                old_origin: OriginId(1),
                new_origin: OriginId(2),
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
        assert!(matches!(
            back.payload,
            EventPayload::OriginSubstituted(OriginSubstitution { new_origin: OriginId(2), .. })
        ));
    }

    #[test]
    fn loc_error_display() {
        let err = LocError::DuplicateTimestamp { t: 30 };
        assert!(err.to_string().contains("30"));

        let err2 = LocError::OriginMismatch(OriginId(1), OriginId(4));
        assert!(err2.to_string().contains("origin#4"));
    }

    #[test]
    fn unknown_origin_id_is_reserved() {
        assert!(OriginId::UNKNOWN.is_unknown());
        assert!(!OriginId(1).is_unknown());
    }
}
