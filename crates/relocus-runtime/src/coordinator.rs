//! [`LocalizationCoordinator`]: owns the robot's live pose and keeps it
//! consistent with odometry, landmark sightings and origin changes.
//!
//! Each control tick:
//!
//! 1. **Odometry** – [`update_from_odometry_message`] appends the firmware's
//!    reported pose to the [`StateHistory`] (with the height resolved from
//!    history, never from the message) and recomputes the live pose.
//! 2. **Relocalization** – when perception recognises a landmark,
//!    [`localize_to_object`] commits a vision keyframe at the observation time,
//!    bumping the frame epoch. If the landmark lives under a different origin
//!    tree, the current world origin is rejiggered under it and every
//!    [`SpatialRegistry`] is told about the substitution.
//! 3. **Correction** – [`send_pending_localization_update`] pushes the newest
//!    keyframe down the [`ActuatorLink`] so the firmware's odometry restarts
//!    from it under the new epoch.
//!
//! Untrustworthy odometry (lifted off the ground, an unknown origin, or an
//! epoch mismatch that never resolves) ends in [`delocalize`]: a fresh origin,
//! an empty history and epoch zero.
//!
//! [`update_from_odometry_message`]: LocalizationCoordinator::update_from_odometry_message
//! [`localize_to_object`]: LocalizationCoordinator::localize_to_object
//! [`send_pending_localization_update`]: LocalizationCoordinator::send_pending_localization_update
//! [`delocalize`]: LocalizationCoordinator::delocalize
//!
//! # Example
//!
//! ```rust
//! use relocus_runtime::{CoordinatorConfig, LocalizationCoordinator, LocalizationState};
//! use relocus_types::{OdometryPose, RobotStateMessage};
//!
//! let mut coordinator = LocalizationCoordinator::new(CoordinatorConfig::default());
//! assert_eq!(coordinator.state(), LocalizationState::Delocalized);
//!
//! let msg = RobotStateMessage {
//!     timestamp: 30,
//!     origin_id: coordinator.world_origin(),
//!     pose: OdometryPose { x: 12.0, ..OdometryPose::default() },
//!     ..RobotStateMessage::default()
//! };
//! coordinator.update_from_odometry_message(&msg).unwrap();
//! assert_eq!(coordinator.history().num_raw_states(), 1);
//! ```

use relocus_geometry::{OriginRegistry, Pose, PoseOriginList, Transform3D};
use relocus_history::{HistRobotState, StateHistory};
use relocus_types::{
    AbsoluteLocalizationUpdate, FrameEpoch, LandmarkId, LocError, OriginId, OriginSubstitution,
    RobotStateMessage, TimeStamp, TreadsState,
};
use tracing::{debug, error, info, instrument, warn};

use crate::config::CoordinatorConfig;
use crate::landmark::{Landmark, LandmarkObservation};
use crate::links::{ActuatorLink, SpatialRegistry};
use crate::mismatch_guard::EpochMismatchGuard;

/// Entries per collection included in the post-relocalization history dump.
const DUMP_DEPTH: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// What the live pose is currently anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalizationState {
    Delocalized,
    LocalizedToOdometry,
    LocalizedToLandmark(LandmarkId),
}

// ─────────────────────────────────────────────────────────────────────────────
// LocalizationCoordinator
// ─────────────────────────────────────────────────────────────────────────────

/// Single-threaded owner of the live pose, the state history and the origin
/// registry. Drive it from one tick loop.
pub struct LocalizationCoordinator<R: OriginRegistry = PoseOriginList> {
    config: CoordinatorConfig,
    history: StateHistory,
    origins: R,
    world_origin: OriginId,
    frame_epoch: FrameEpoch,
    pose: Pose,
    drive_center_pose: Pose,
    head_angle_rad: f32,
    lift_angle_rad: f32,
    state: LocalizationState,
    localized_marker_dist_sq: Option<f32>,
    treads_state: TreadsState,
    is_carrying_object: bool,
    is_picked_up: bool,
    has_moved_since_localization: bool,
    // ── Actuator sync ────────────────────────────────────────────────────────
    is_synced: bool,
    needs_localization_update: bool,
    last_msg_timestamp: TimeStamp,
    mismatch_guard: EpochMismatchGuard,
    // ── Outbound seams ───────────────────────────────────────────────────────
    actuator: Option<Box<dyn ActuatorLink>>,
    registries: Vec<Box<dyn SpatialRegistry>>,
}

impl LocalizationCoordinator<PoseOriginList> {
    /// A coordinator backed by an empty [`PoseOriginList`].
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_origin_registry(config, PoseOriginList::new())
    }
}

impl<R: OriginRegistry> LocalizationCoordinator<R> {
    /// A coordinator over an existing registry. Starts delocalized in a
    /// freshly allocated origin.
    pub fn with_origin_registry(config: CoordinatorConfig, origins: R) -> Self {
        let mut coordinator = Self {
            history: StateHistory::with_window(config.history_window_ms),
            mismatch_guard: EpochMismatchGuard::new(config.max_mismatched_epoch_ticks),
            config,
            origins,
            world_origin: OriginId::UNKNOWN,
            frame_epoch: 0,
            pose: Pose::identity(OriginId::UNKNOWN),
            drive_center_pose: Pose::identity(OriginId::UNKNOWN),
            head_angle_rad: 0.0,
            lift_angle_rad: 0.0,
            state: LocalizationState::Delocalized,
            localized_marker_dist_sq: None,
            treads_state: TreadsState::OnTreads,
            is_carrying_object: false,
            is_picked_up: false,
            has_moved_since_localization: false,
            is_synced: false,
            needs_localization_update: false,
            last_msg_timestamp: 0,
            actuator: None,
            registries: Vec::new(),
        };
        coordinator.delocalize(false);
        coordinator
    }

    pub fn with_actuator_link(mut self, link: Box<dyn ActuatorLink>) -> Self {
        self.actuator = Some(link);
        self
    }

    pub fn add_spatial_registry(&mut self, registry: Box<dyn SpatialRegistry>) {
        debug!(registry = registry.name(), "spatial registry attached");
        self.registries.push(registry);
    }

    // ── Delocalization ───────────────────────────────────────────────────────

    /// Abandon the current frame: allocate a new independent origin, reset
    /// the live pose to identity in it and restart history at epoch zero.
    pub fn delocalize(&mut self, was_carrying_object: bool) {
        let old_origin = self.world_origin;

        self.state = LocalizationState::Delocalized;
        self.localized_marker_dist_sq = None;

        let new_origin = self.origins.add_new_origin();
        self.world_origin = new_origin;
        info!(
            %old_origin,
            %new_origin,
            num_origins = self.origins.len(),
            "delocalizing robot"
        );

        self.history.clear();
        self.frame_epoch = 0;
        self.mismatch_guard.reset();

        self.pose = Pose::identity(new_origin);
        self.drive_center_pose = Pose::identity(new_origin);

        self.needs_localization_update = false;

        if self.is_synced {
            info!(
                t = self.last_msg_timestamp,
                %new_origin,
                "sending localization update for new origin"
            );
            let pose = self.pose.clone();
            if let Err(e) = self.send_localization_update(self.last_msg_timestamp, 0, pose) {
                warn!(error = %e, "failed to send localization update");
            }
        }

        if was_carrying_object != self.is_carrying_object {
            warn!(
                was_carrying_object,
                is_carrying_object = self.is_carrying_object,
                "carrying state mismatch on delocalize"
            );
        }

        if self.is_carrying_object && !old_origin.is_unknown() {
            for registry in &mut self.registries {
                registry.on_carried_object_origin_changed(old_origin);
            }
        }

        for registry in &mut self.registries {
            registry.on_robot_delocalized(new_origin);
        }
    }

    // ── Localization ─────────────────────────────────────────────────────────

    /// Mark the live pose as trustworthy, anchored either to `landmark` or to
    /// odometry alone.
    pub fn set_localized_to(&mut self, landmark: Option<&Landmark>) -> Result<(), LocError> {
        let Some(landmark) = landmark else {
            self.state = LocalizationState::LocalizedToOdometry;
            self.localized_marker_dist_sq = None;
            return Ok(());
        };

        if !self.treads_state.is_on_treads() {
            error!(treads = ?self.treads_state, "cannot localize while off treads");
            return Err(LocError::OffTreads);
        }
        let id = landmark.id.ok_or_else(|| {
            error!("cannot localize to a landmark without an id");
            LocError::LandmarkWithoutId
        })?;

        let robot = self.origins.flatten_pose(&self.pose)?;
        let mut closest: Option<f32> = None;
        for marker in landmark.most_recently_observed_markers() {
            let marker_pose = self.origins.flatten_pose(&marker.pose)?;
            let dist_sq = marker_pose.relative_to(&robot)?.translation.length_sq();
            closest = Some(closest.map_or(dist_sq, |c| c.min(dist_sq)));
        }

        self.localized_marker_dist_sq = closest;
        self.state = LocalizationState::LocalizedToLandmark(id);
        self.has_moved_since_localization = false;
        info!(landmark = %id, marker_dist_sq = ?closest, "localized to landmark");
        Ok(())
    }

    /// Relocalize against `landmark`.
    ///
    /// With an `observation`, the robot's pose at the observation time is
    /// taken from history and committed as a new keyframe under a bumped
    /// epoch. Without one, the live pose is used and nothing is committed.
    ///
    /// # Errors
    ///
    /// - [`LocError::NoLandmark`] if `landmark` is `None`.
    /// - [`LocError::HistoricalStateNotFound`] if history has nothing at the
    ///   observation time.
    /// - [`LocError::OffTreads`] if the robot was picked up or is off its
    ///   treads. The keyframe is still committed in that case.
    #[instrument(skip_all, fields(landmark = ?landmark.and_then(|l| l.id), observed_at = ?observation.map(|o| o.timestamp)))]
    pub fn localize_to_object(
        &mut self,
        observation: Option<&LandmarkObservation>,
        landmark: Option<&Landmark>,
    ) -> Result<(), LocError> {
        let landmark = landmark.ok_or_else(|| {
            error!("no landmark to localize against");
            LocError::NoLandmark
        })?;
        let landmark_pose = self.origins.flatten_pose(&landmark.pose)?;

        let mut cached = None;
        let (reference, relative, head, lift, was_picked_up) = match observation {
            None => {
                let live = self.origins.flatten_pose(&self.pose)?;
                let relative = live.relative_to(&landmark_pose).map_err(|e| {
                    error!(error = %e, "live pose and landmark share no origin");
                    e
                })?;
                (live, relative, self.head_angle_rad, self.lift_angle_rad, self.is_picked_up)
            }
            Some(obs) => {
                let t = obs.timestamp;
                let (key, hist) = match self.history.get_computed_state_at(t) {
                    Ok((key, hist)) => (key, hist.clone()),
                    Err(_) => {
                        let (_, key, hist) =
                            self.history.compute_and_cache_state_at(t, true).map_err(|e| {
                                error!(t, error = %e, "no historical state at observation time");
                                LocError::HistoricalStateNotFound { t }
                            })?;
                        (key, hist)
                    }
                };
                let hist_pose = self.origins.flatten_pose(hist.pose())?;
                let observed = self.origins.flatten_pose(&obs.observed_pose)?;
                let relative = hist_pose.relative_to(&observed).map_err(|e| {
                    error!(error = %e, "historical pose and observation share no origin");
                    e
                })?;
                let picked_up = hist.was_picked_up();
                let (head, lift) = (hist.head_angle_rad(), hist.lift_angle_rad());
                cached = Some((key, hist));
                (hist_pose, relative, head, lift, picked_up)
            }
        };

        let mut new_pose = self
            .origins
            .flatten_pose(&Pose::with_parent(relative, landmark.pose.clone()))?;

        if self.is_localized() {
            let w = self.config.z_update_weight;
            let z = w * new_pose.translation().z + (1.0 - w) * self.pose.translation().z;
            new_pose = new_pose.with_transform(new_pose.transform.with_z(z));
        }

        if let Some(obs) = observation {
            let epoch = self.frame_epoch + 1;
            let keyframe = HistRobotState::keyframe(epoch, new_pose.clone(), head, lift);
            self.history
                .add_vision_keyframe(obs.timestamp, keyframe)
                .map_err(|e| {
                    error!(t = obs.timestamp, error = %e, "failed to add vision keyframe");
                    e
                })?;
            self.frame_epoch = epoch;
            self.needs_localization_update = true;
        }

        if landmark_pose.origin() != self.world_origin {
            self.rejigger_world_origin(&reference, &new_pose)?;
        }

        if let Some((key, hist)) = cached {
            let corrected = hist.with_pose(self.frame_epoch, new_pose, head, lift);
            self.history.update_computed_state(key, corrected)?;
        }

        self.update_pose_from_history().map_err(|e| {
            error!(error = %e, "failed to update pose from history");
            e
        })?;

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(history = %self.history.dump(DUMP_DEPTH), "history after relocalization");
        }

        if was_picked_up || !self.treads_state.is_on_treads() {
            info!("keyframe committed but not localizing while off treads");
            return Err(LocError::OffTreads);
        }

        self.set_localized_to(Some(landmark))
    }

    /// Re-parent the current world origin under the root `new_pose` lives in.
    ///
    /// `reference` is the robot pose in the current world origin that
    /// corresponds to `new_pose`.
    fn rejigger_world_origin(&mut self, reference: &Pose, new_pose: &Pose) -> Result<(), LocError> {
        let old_origin = self.world_origin;
        let new_origin = new_pose.origin();
        info!(%old_origin, %new_origin, "rejiggering world origin");

        let transform = new_pose.transform.compose(reference.transform.inverse());
        self.origins.rejigger(old_origin, new_origin, transform).map_err(|e| {
            error!(error = %e, "rejigger failed");
            e
        })?;
        self.world_origin = new_origin;
        self.history.substitute_origin(old_origin, new_origin, transform);
        self.pose = Pose::new(transform.compose(self.pose.transform), new_origin);

        let substitution = OriginSubstitution {
            old_origin,
            new_origin,
        };
        for registry in &mut self.registries {
            debug!(registry = registry.name(), "broadcasting origin substitution");
            registry.on_origin_substituted(&substitution);
        }

        let relinked = self.origins.flatten(new_origin)?;
        debug!(%new_origin, relinked, "flattened origin tree");
        Ok(())
    }

    // ── Odometry ─────────────────────────────────────────────────────────────

    /// Per-tick entry point for the firmware's state message.
    #[instrument(skip_all, fields(t = msg.timestamp, epoch = msg.frame_epoch, origin = %msg.origin_id))]
    pub fn update_from_odometry_message(&mut self, msg: &RobotStateMessage) -> Result<(), LocError> {
        self.last_msg_timestamp = msg.timestamp;
        self.head_angle_rad = msg.head_angle_rad;
        self.lift_angle_rad = msg.lift_angle_rad;
        self.is_carrying_object = msg.status.is_carrying_object;
        self.is_picked_up = msg.status.is_picked_up;

        let previous_treads = self.treads_state;
        self.treads_state = msg.treads_state;
        self.has_moved_since_localization |= !msg.status.head_in_position
            || msg.status.are_wheels_moving
            || !msg.treads_state.is_on_treads();

        if previous_treads.is_on_treads() != msg.treads_state.is_on_treads() {
            info!(from = ?previous_treads, to = ?msg.treads_state, "treads state changed");
            self.delocalize(self.is_carrying_object);
            return Ok(());
        }

        if !self.origins.contains(msg.origin_id) {
            error!(
                num_origins = self.origins.len(),
                "state message declares an unknown origin, delocalizing"
            );
            self.delocalize(self.is_carrying_object);
            return Err(LocError::UnknownOrigin(msg.origin_id));
        }

        let reported = self.origins.flatten_pose(&Pose::planar(
            msg.pose.x,
            msg.pose.y,
            0.0,
            msg.pose.heading_rad,
            msg.origin_id,
        ))?;

        if msg.frame_epoch > self.frame_epoch {
            warn!(current = self.frame_epoch, "state message frame epoch is from the future");
        }

        let frame_is_current =
            msg.frame_epoch == self.frame_epoch && reported.origin() == self.world_origin;
        if self.mismatch_guard.record(frame_is_current) {
            error!(
                current = self.frame_epoch,
                ticks = self.mismatch_guard.threshold(),
                "firmware and coordinator frame epochs stayed mismatched, delocalizing"
            );
            self.delocalize(self.is_carrying_object);
            return Err(LocError::PersistentEpochMismatch {
                ticks: self.mismatch_guard.threshold(),
            });
        }

        let z = if frame_is_current {
            self.pose.translation().z
        } else {
            let last = self
                .history
                .get_last_state_with_frame_epoch(msg.frame_epoch)
                .map_err(|e| {
                    if msg.frame_epoch != 0 {
                        warn!(error = %e, "no stored state for message frame epoch");
                    }
                    e
                })?;
            let last_pose = self.origins.flatten_pose(last.pose())?;
            if last_pose.origin() != reported.origin() {
                warn!(stored = %last_pose.origin(), "message frame epoch belongs to another origin");
                return Err(LocError::StaleFrame {
                    epoch: msg.frame_epoch,
                    origin: msg.origin_id,
                });
            }
            last_pose.translation().z
        };

        let pose = reported.with_transform(reported.transform.with_z(z));
        self.history
            .add_raw_odometry_state(msg.timestamp, HistRobotState::from_message(pose, msg))
            .map_err(|e| {
                warn!(error = %e, "failed to add raw odometry state");
                e
            })?;

        self.update_pose_from_history()
    }

    /// Recompute the live pose from the newest entry in history.
    fn update_pose_from_history(&mut self) -> Result<(), LocError> {
        let newest = self
            .history
            .newest_timestamp()
            .max(self.history.newest_vision_timestamp());
        let Some(t) = newest else {
            return Ok(());
        };

        let (_, state) = self.history.compute_state_at(t, false)?;
        let pose = self.origins.flatten_pose(state.pose())?;
        if pose.origin() != self.world_origin {
            return Err(LocError::OriginMismatch(pose.origin(), self.world_origin));
        }
        self.set_live_pose(pose);
        Ok(())
    }

    // ── Absolute pose ────────────────────────────────────────────────────────

    /// Force the live pose, e.g. when docked at a known spot. Commits a
    /// keyframe under a new epoch at the last message time.
    pub fn set_new_pose(&mut self, pose: &Pose) -> Result<(), LocError> {
        let pose = self.origins.flatten_pose(pose)?;
        if pose.origin() != self.world_origin {
            return Err(LocError::OriginMismatch(pose.origin(), self.world_origin));
        }

        let epoch = self.frame_epoch + 1;
        let keyframe =
            HistRobotState::keyframe(epoch, pose.clone(), self.head_angle_rad, self.lift_angle_rad);
        self.history.add_vision_keyframe(self.last_msg_timestamp, keyframe)?;

        self.frame_epoch = epoch;
        self.set_live_pose(pose);
        self.needs_localization_update = true;
        Ok(())
    }

    fn set_live_pose(&mut self, pose: Pose) {
        let offset = if self.is_carrying_object {
            0.0
        } else {
            self.config.drive_center_offset_mm
        };
        self.drive_center_pose = pose.with_transform(
            pose.transform
                .compose(Transform3D::planar(offset, 0.0, 0.0, 0.0)),
        );
        self.pose = pose;
    }

    // ── Actuator sync ────────────────────────────────────────────────────────

    /// Start a new handshake with the firmware. Corrections are held back
    /// until [`on_sync_acked`](Self::on_sync_acked).
    pub fn begin_sync(&mut self) {
        info!("beginning actuator sync");
        self.history.clear();
        self.is_synced = false;
    }

    pub fn on_sync_acked(&mut self) {
        info!(origin = %self.world_origin, epoch = self.frame_epoch, "actuator sync acknowledged");
        self.is_synced = true;
    }

    /// Send the newest keyframe if a commit is waiting and the firmware is
    /// synced. Returns whether anything was sent.
    pub fn send_pending_localization_update(&mut self) -> Result<bool, LocError> {
        if !self.needs_localization_update || !self.is_synced {
            return Ok(false);
        }
        let Some((t, keyframe)) = self.history.get_latest_vision_keyframe() else {
            warn!("localization update pending but history holds no keyframe");
            self.needs_localization_update = false;
            return Ok(false);
        };
        let (epoch, pose) = (keyframe.frame_epoch(), keyframe.pose().clone());
        self.send_localization_update(t, epoch, pose)?;
        self.needs_localization_update = false;
        Ok(true)
    }

    fn send_localization_update(
        &mut self,
        t: TimeStamp,
        epoch: FrameEpoch,
        pose: Pose,
    ) -> Result<(), LocError> {
        let pose = self.origins.flatten_pose(&pose)?;
        let update = AbsoluteLocalizationUpdate {
            timestamp: t,
            frame_epoch: epoch,
            origin_id: pose.origin(),
            x: pose.translation().x,
            y: pose.translation().y,
            heading_rad: pose.heading(),
        };
        match self.actuator.as_mut() {
            Some(link) => link.send_localization_update(&update),
            None => {
                debug!(t, epoch, "no actuator link, dropping localization update");
                Ok(())
            }
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn drive_center_pose(&self) -> &Pose {
        &self.drive_center_pose
    }

    pub fn frame_epoch(&self) -> FrameEpoch {
        self.frame_epoch
    }

    pub fn world_origin(&self) -> OriginId {
        self.world_origin
    }

    pub fn state(&self) -> LocalizationState {
        self.state
    }

    pub fn is_localized(&self) -> bool {
        self.state != LocalizationState::Delocalized
    }

    pub fn localized_to(&self) -> Option<LandmarkId> {
        match self.state {
            LocalizationState::LocalizedToLandmark(id) => Some(id),
            _ => None,
        }
    }

    /// Squared distance to the closest marker seen when last localized to a
    /// landmark.
    pub fn localized_marker_distance_sq(&self) -> Option<f32> {
        self.localized_marker_dist_sq
    }

    pub fn has_moved_since_localization(&self) -> bool {
        self.has_moved_since_localization
    }

    pub fn treads_state(&self) -> TreadsState {
        self.treads_state
    }

    pub fn history(&self) -> &StateHistory {
        &self.history
    }

    pub fn origins(&self) -> &R {
        &self.origins
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn is_synced(&self) -> bool {
        self.is_synced
    }

    pub fn needs_localization_update(&self) -> bool {
        self.needs_localization_update
    }

    pub fn mismatch_count(&self) -> u32 {
        self.mismatch_guard.count()
    }

    /// The cached computed pose at `t`, expressed in the current world origin.
    pub fn computed_pose_at(&self, t: TimeStamp) -> Result<Pose, LocError> {
        let (_, state) = self.history.get_computed_state_at(t)?;
        let pose = self.origins.flatten_pose(state.pose())?;
        if pose.origin() != self.world_origin {
            return Err(LocError::OriginMismatch(pose.origin(), self.world_origin));
        }
        Ok(pose)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
