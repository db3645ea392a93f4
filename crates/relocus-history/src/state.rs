//! A single recorded robot state.

use relocus_geometry::transform::normalize_angle;
use relocus_geometry::{Pose, Quaternion, Transform3D};
use relocus_types::{
    CLIFF_SENSOR_COUNT, CliffSensor, FrameEpoch, LocError, ProxReading, RobotStateMessage,
    StatusFlags, TimeStamp,
};
use serde::{Deserialize, Serialize};

/// Robot state at one instant: pose, frame epoch, actuator angles and the
/// sensor readings that accompanied it.
///
/// Values are built once and replaced wholesale; the `with_*` helpers return
/// modified copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistRobotState {
    pose: Pose,
    frame_epoch: FrameEpoch,
    head_angle_rad: f32,
    lift_angle_rad: f32,
    pitch_rad: f32,
    status: StatusFlags,
    cliff_data: [u16; CLIFF_SENSOR_COUNT],
    cliff_detected_flags: u8,
    lwheel_speed_mmps: f32,
    rwheel_speed_mmps: f32,
    prox: ProxReading,
}

impl HistRobotState {
    /// Build from a firmware message. `pose` replaces the message's own pose
    /// so the caller can supply the flattened, height-corrected one.
    pub fn from_message(pose: Pose, msg: &RobotStateMessage) -> Self {
        Self {
            pose,
            frame_epoch: msg.frame_epoch,
            head_angle_rad: msg.head_angle_rad,
            lift_angle_rad: msg.lift_angle_rad,
            pitch_rad: msg.pose.pitch_rad,
            status: msg.status,
            cliff_data: msg.cliff_data_raw,
            cliff_detected_flags: msg.cliff_detected_flags,
            lwheel_speed_mmps: msg.lwheel_speed_mmps,
            rwheel_speed_mmps: msg.rwheel_speed_mmps,
            prox: msg.prox,
        }
    }

    /// A pose-only state, as committed for an absolute correction.
    pub fn keyframe(
        frame_epoch: FrameEpoch,
        pose: Pose,
        head_angle_rad: f32,
        lift_angle_rad: f32,
    ) -> Self {
        Self {
            pose,
            frame_epoch,
            head_angle_rad,
            lift_angle_rad,
            pitch_rad: 0.0,
            status: StatusFlags::default(),
            cliff_data: [0; CLIFF_SENSOR_COUNT],
            cliff_detected_flags: 0,
            lwheel_speed_mmps: 0.0,
            rwheel_speed_mmps: 0.0,
            prox: ProxReading::default(),
        }
    }

    /// Copy with pose, epoch and actuator angles replaced.
    pub fn with_pose(
        &self,
        frame_epoch: FrameEpoch,
        pose: Pose,
        head_angle_rad: f32,
        lift_angle_rad: f32,
    ) -> Self {
        Self {
            pose,
            frame_epoch,
            head_angle_rad,
            lift_angle_rad,
            ..self.clone()
        }
    }

    pub fn with_prox(&self, prox: ProxReading) -> Self {
        Self {
            prox,
            ..self.clone()
        }
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn frame_epoch(&self) -> FrameEpoch {
        self.frame_epoch
    }

    pub fn head_angle_rad(&self) -> f32 {
        self.head_angle_rad
    }

    pub fn lift_angle_rad(&self) -> f32 {
        self.lift_angle_rad
    }

    pub fn pitch_rad(&self) -> f32 {
        self.pitch_rad
    }

    pub fn status(&self) -> StatusFlags {
        self.status
    }

    pub fn cliff_data(&self, sensor: CliffSensor) -> u16 {
        self.cliff_data[sensor as usize]
    }

    pub fn was_cliff_detected(&self, sensor: CliffSensor) -> bool {
        self.cliff_detected_flags & (1 << sensor as u8) != 0
    }

    pub fn left_wheel_speed_mmps(&self) -> f32 {
        self.lwheel_speed_mmps
    }

    pub fn right_wheel_speed_mmps(&self) -> f32 {
        self.rwheel_speed_mmps
    }

    pub fn prox(&self) -> &ProxReading {
        &self.prox
    }

    pub fn was_carrying_object(&self) -> bool {
        self.status.is_carrying_object
    }

    pub fn was_moving(&self) -> bool {
        self.status.is_moving
    }

    pub fn was_head_moving(&self) -> bool {
        !self.status.head_in_position
    }

    pub fn was_lift_moving(&self) -> bool {
        !self.status.lift_in_position
    }

    pub fn were_wheels_moving(&self) -> bool {
        self.status.are_wheels_moving
    }

    pub fn was_picked_up(&self) -> bool {
        self.status.is_picked_up
    }

    pub fn was_camera_moving(&self) -> bool {
        self.status.is_camera_moving || self.was_head_moving() || self.were_wheels_moving()
    }

    /// Blend two samples of the same frame epoch and origin.
    ///
    /// Continuous values are interpolated linearly by `fraction`; flags are
    /// taken from whichever sample is closer, the earlier one on a tie.
    pub fn interpolate(
        first: &HistRobotState,
        second: &HistRobotState,
        fraction: f32,
        t: TimeStamp,
    ) -> Result<HistRobotState, LocError> {
        if first.frame_epoch != second.frame_epoch {
            return Err(LocError::EpochMismatch {
                t,
                before: first.frame_epoch,
                after: second.frame_epoch,
            });
        }
        if first.pose.origin() != second.pose.origin() {
            return Err(LocError::OriginMismatch(
                first.pose.origin(),
                second.pose.origin(),
            ));
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let closest = if fraction <= 0.5 { first } else { second };
        let lerp = |a: f32, b: f32| a + fraction * (b - a);
        let lerp_u16 = |a: u16, b: u16| lerp(f32::from(a), f32::from(b)).round() as u16;

        let p1 = first.pose.transform;
        let p2 = second.pose.transform;
        let translation = p1
            .translation
            .add(p2.translation.sub(p1.translation).scale(fraction));
        let heading = p1.heading() + fraction * normalize_angle(p2.heading() - p1.heading());
        let pose = first.pose.with_transform(Transform3D::new(
            translation,
            Quaternion::from_yaw(normalize_angle(heading)),
        ));

        let mut cliff_data = [0; CLIFF_SENSOR_COUNT];
        for (i, slot) in cliff_data.iter_mut().enumerate() {
            *slot = lerp_u16(first.cliff_data[i], second.cliff_data[i]);
        }

        let prox = ProxReading {
            distance_mm: lerp_u16(first.prox.distance_mm, second.prox.distance_mm),
            signal_quality: lerp(first.prox.signal_quality, second.prox.signal_quality),
            ..closest.prox
        };

        Ok(HistRobotState {
            pose,
            frame_epoch: first.frame_epoch,
            head_angle_rad: lerp(first.head_angle_rad, second.head_angle_rad),
            lift_angle_rad: lerp(first.lift_angle_rad, second.lift_angle_rad),
            pitch_rad: lerp(first.pitch_rad, second.pitch_rad),
            status: closest.status,
            cliff_data,
            cliff_detected_flags: closest.cliff_detected_flags,
            lwheel_speed_mmps: lerp(first.lwheel_speed_mmps, second.lwheel_speed_mmps),
            rwheel_speed_mmps: lerp(first.rwheel_speed_mmps, second.rwheel_speed_mmps),
            prox,
        })
    }
}

impl std::fmt::Display for HistRobotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = self.pose.translation();
        write!(
            f,
            "epoch {} {} ({:.1}, {:.1}, {:.1}) hdg {:.3} head {:.3} cliff {:?} carrying {} moving {} [{}{}{}]",
            self.frame_epoch,
            self.pose.origin(),
            t.x,
            t.y,
            t.z,
            self.pose.heading(),
            self.head_angle_rad,
            self.cliff_data,
            if self.was_carrying_object() { "Y" } else { "N" },
            if self.was_moving() { "Y" } else { "N" },
            if self.was_head_moving() { "H" } else { "" },
            if self.was_lift_moving() { "L" } else { "" },
            if self.were_wheels_moving() { "B" } else { "" },
        )
    }
}
