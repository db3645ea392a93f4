//! Time-indexed robot state history.
//!
//! [`StateHistory`] keeps three ordered collections:
//!
//! - **raw** states, one per odometry tick;
//! - **vision** keyframes, one per accepted absolute correction;
//! - **computed** states, keyframes projected forward through raw odometry,
//!   cached under a [`HistStateKey`] so callers can refer back to "the state as
//!   of this observation".
//!
//! Everything older than the retention window (measured back from the newest
//! raw timestamp) is culled after each insert.
//!
//! # Example
//!
//! ```rust
//! use relocus_geometry::Pose;
//! use relocus_history::{HistRobotState, StateHistory};
//! use relocus_types::OriginId;
//!
//! let origin = OriginId(1);
//! let mut history = StateHistory::new();
//! history.add_raw_odometry_state(0, HistRobotState::keyframe(1, Pose::planar(0.0, 0.0, 0.0, 0.0, origin), 0.0, 0.0)).unwrap();
//! history.add_raw_odometry_state(100, HistRobotState::keyframe(1, Pose::planar(10.0, 0.0, 0.0, 0.0, origin), 0.0, 0.0)).unwrap();
//!
//! let (t, mid) = history.get_raw_state_at(50, true).unwrap();
//! assert_eq!(t, 50);
//! assert!((mid.pose().translation().x - 5.0).abs() < 1e-5);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use relocus_geometry::{Pose, Transform3D};
use relocus_types::{FrameEpoch, LocError, OriginId, ProxReading, TimeStamp};
use tracing::{debug, error, info, warn};

use crate::projection::project_forward;
use crate::state::HistRobotState;

/// Stable handle to a computed state.
pub type HistStateKey = u32;

/// Default retention window.
pub const DEFAULT_WINDOW_MS: u32 = 3000;

type StateMap = BTreeMap<TimeStamp, HistRobotState>;

// ────────────────────────────────────────────────────────────────────────────
// StateHistory
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StateHistory {
    raw: StateMap,
    vision: StateMap,
    computed: StateMap,
    key_by_time: BTreeMap<TimeStamp, HistStateKey>,
    time_by_key: HashMap<HistStateKey, TimeStamp>,
    last_key: HistStateKey,
    window_ms: u32,
}

impl Default for StateHistory {
    fn default() -> Self {
        Self::with_window(DEFAULT_WINDOW_MS)
    }
}

impl StateHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(window_ms: u32) -> Self {
        Self {
            raw: StateMap::new(),
            vision: StateMap::new(),
            computed: StateMap::new(),
            key_by_time: BTreeMap::new(),
            time_by_key: HashMap::new(),
            last_key: 0,
            window_ms,
        }
    }

    /// Drop every stored state. Keys already handed out stay invalid.
    pub fn clear(&mut self) {
        self.raw.clear();
        self.vision.clear();
        self.computed.clear();
        self.key_by_time.clear();
        self.time_by_key.clear();
    }

    pub fn window_ms(&self) -> u32 {
        self.window_ms
    }

    pub fn set_time_window(&mut self, window_ms: u32) {
        self.window_ms = window_ms;
        self.cull_to_window_size();
    }

    // ── Insertion ───────────────────────────────────────────────────────────

    fn check_insertable(&self, t: TimeStamp, state: &HistRobotState) -> Result<(), LocError> {
        if !state.pose().is_flattened() {
            error!(t, "rejecting state with non-flattened pose");
            return Err(LocError::NonFlattenedPose { t });
        }
        if let Some(newest) = self.newest_timestamp() {
            if t < newest.saturating_sub(self.window_ms) {
                warn!(t, newest, window_ms = self.window_ms, "rejecting state older than window");
                return Err(LocError::TooOld { t, newest });
            }
        }
        Ok(())
    }

    fn check_epoch_order(map: &StateMap, t: TimeStamp, epoch: FrameEpoch) -> Result<(), LocError> {
        let before = map.range(..t).next_back();
        let after = map.range((Bound::Excluded(t), Bound::Unbounded)).next();
        let too_low = before.is_some_and(|(_, s)| s.frame_epoch() > epoch);
        let too_high = after.is_some_and(|(_, s)| s.frame_epoch() < epoch);
        if too_low || too_high {
            warn!(t, epoch, "frame epochs out of order");
            return Err(LocError::EpochOutOfOrder { t, epoch });
        }
        Ok(())
    }

    /// Insert one odometry sample.
    pub fn add_raw_odometry_state(
        &mut self,
        t: TimeStamp,
        state: HistRobotState,
    ) -> Result<(), LocError> {
        self.check_insertable(t, &state)?;
        if self.raw.contains_key(&t) {
            warn!(t, "raw state already present");
            return Err(LocError::DuplicateTimestamp { t });
        }
        Self::check_epoch_order(&self.raw, t, state.frame_epoch())?;
        self.raw.insert(t, state);
        self.cull_to_window_size();
        Ok(())
    }

    /// Insert a vision keyframe, replacing any keyframe already stored at `t`.
    pub fn add_vision_keyframe(
        &mut self,
        t: TimeStamp,
        state: HistRobotState,
    ) -> Result<(), LocError> {
        self.check_insertable(t, &state)?;
        Self::check_epoch_order(&self.vision, t, state.frame_epoch())?;
        match self.vision.get_mut(&t) {
            Some(existing) => {
                info!(t, old = %existing, new = %state, "overwriting vision keyframe");
                *existing = state;
            }
            None => {
                self.vision.insert(t, state);
                self.cull_to_window_size();
            }
        }
        Ok(())
    }

    /// Replace the proximity reading of the raw state stored exactly at `t`.
    pub fn update_prox_sensor_data(&mut self, t: TimeStamp, prox: ProxReading) -> Result<(), LocError> {
        let state = self.raw.get_mut(&t).ok_or(LocError::OutOfRange { t })?;
        *state = state.with_prox(prox);
        Ok(())
    }

    /// Re-express every stored pose under `old` as a pose under `new`.
    ///
    /// `transform` maps points in `old` into `new`.
    pub fn substitute_origin(&mut self, old: OriginId, new: OriginId, transform: Transform3D) {
        let mut moved = 0usize;
        for state in self
            .raw
            .values_mut()
            .chain(self.vision.values_mut())
            .chain(self.computed.values_mut())
        {
            if state.pose().origin() == old {
                let pose = Pose::new(transform.compose(state.pose().transform), new);
                *state = state.with_pose(
                    state.frame_epoch(),
                    pose,
                    state.head_angle_rad(),
                    state.lift_angle_rad(),
                );
                moved += 1;
            }
        }
        debug!(%old, %new, moved, "substituted origin in history");
    }

    // ── Lookup ──────────────────────────────────────────────────────────────

    /// The raw state at `t`, interpolated between its neighbours or snapped
    /// to the closer one.
    ///
    /// Returns the timestamp the state actually belongs to: `t` itself unless
    /// a neighbour was snapped to.
    pub fn get_raw_state_at(
        &self,
        t: TimeStamp,
        interpolate: bool,
    ) -> Result<(TimeStamp, HistRobotState), LocError> {
        let out_of_range = LocError::OutOfRange { t };
        let (&after_t, after) = self.raw.range(t..).next().ok_or(out_of_range.clone())?;
        if after_t == t {
            return Ok((t, after.clone()));
        }
        let (&before_t, before) = self.raw.range(..t).next_back().ok_or(out_of_range)?;

        if interpolate {
            let fraction = (t - before_t) as f32 / (after_t - before_t) as f32;
            let state = HistRobotState::interpolate(before, after, fraction, t)?;
            Ok((t, state))
        } else if t - before_t <= after_t - t {
            Ok((before_t, before.clone()))
        } else {
            Ok((after_t, after.clone()))
        }
    }

    /// The raw states strictly before and strictly after `t`.
    pub fn get_raw_state_before_and_after(
        &self,
        t: TimeStamp,
    ) -> Result<((TimeStamp, &HistRobotState), (TimeStamp, &HistRobotState)), LocError> {
        let before = self.raw.range(..t).next_back();
        let after = self
            .raw
            .range((Bound::Excluded(t), Bound::Unbounded))
            .next();
        match (before, after) {
            (Some((&tb, b)), Some((&ta, a))) => Ok(((tb, b), (ta, a))),
            _ => Err(LocError::OutOfRange { t }),
        }
    }

    pub fn get_vision_keyframe_at(&self, t: TimeStamp) -> Option<&HistRobotState> {
        self.vision.get(&t)
    }

    pub fn get_latest_vision_keyframe(&self) -> Option<(TimeStamp, &HistRobotState)> {
        self.vision.last_key_value().map(|(&t, s)| (t, s))
    }

    /// Best estimate of the robot state at `t`.
    ///
    /// An exact keyframe wins outright. Otherwise the raw state at `t` is
    /// corrected against the latest keyframe at or before it, unless the raw
    /// state already belongs to a newer frame epoch than that keyframe.
    pub fn compute_state_at(
        &self,
        t: TimeStamp,
        interpolate: bool,
    ) -> Result<(TimeStamp, HistRobotState), LocError> {
        if let Some(keyframe) = self.vision.get(&t) {
            return Ok((t, keyframe.clone()));
        }

        let (t_raw, raw) = self.get_raw_state_at(t, interpolate)?;

        let Some((&t_key, keyframe)) = self.vision.range(..=t_raw).next_back() else {
            return Ok((t_raw, raw));
        };

        if raw.frame_epoch() > keyframe.frame_epoch() {
            return Ok((t_raw, raw));
        }

        let motion = project_forward(self.raw.range(t_key..=t_raw), &raw)?;
        let pose = keyframe
            .pose()
            .with_transform(keyframe.pose().transform.compose(motion));
        let state = raw.with_pose(
            raw.frame_epoch(),
            pose,
            raw.head_angle_rad(),
            raw.lift_angle_rad(),
        );
        Ok((t_raw, state))
    }

    /// [`compute_state_at`](Self::compute_state_at), then cache the result.
    ///
    /// Recomputing at a cached timestamp overwrites the cached state and keeps
    /// its key.
    pub fn compute_and_cache_state_at(
        &mut self,
        t: TimeStamp,
        interpolate: bool,
    ) -> Result<(TimeStamp, HistStateKey, HistRobotState), LocError> {
        let (t_state, state) = self.compute_state_at(t, interpolate)?;
        let key = match self.key_by_time.get(&t_state) {
            Some(&key) => key,
            None => {
                self.last_key += 1;
                let key = self.last_key;
                self.key_by_time.insert(t_state, key);
                self.time_by_key.insert(key, t_state);
                key
            }
        };
        self.computed.insert(t_state, state.clone());
        Ok((t_state, key, state))
    }

    pub fn get_computed_state_at(
        &self,
        t: TimeStamp,
    ) -> Result<(HistStateKey, &HistRobotState), LocError> {
        let state = self.computed.get(&t).ok_or(LocError::OutOfRange { t })?;
        let key = self.key_by_time.get(&t).ok_or_else(|| {
            warn!(t, "computed state has no key");
            LocError::OutOfRange { t }
        })?;
        Ok((*key, state))
    }

    /// Replace the computed state behind `key`.
    pub fn update_computed_state(
        &mut self,
        key: HistStateKey,
        state: HistRobotState,
    ) -> Result<(), LocError> {
        let t = *self.time_by_key.get(&key).ok_or(LocError::InvalidKey(key))?;
        let slot = self.computed.get_mut(&t).ok_or(LocError::InvalidKey(key))?;
        *slot = state;
        Ok(())
    }

    pub fn is_valid_key(&self, key: HistStateKey) -> bool {
        self.time_by_key.contains_key(&key)
    }

    /// Most recent stored state carrying `epoch`, raw states first.
    pub fn get_last_state_with_frame_epoch(
        &self,
        epoch: FrameEpoch,
    ) -> Result<&HistRobotState, LocError> {
        if self.raw.is_empty() && self.vision.is_empty() {
            info!(epoch, "history is empty");
            return Err(LocError::FrameEpochNotFound(epoch));
        }
        for map in [&self.raw, &self.vision] {
            for state in map.values().rev() {
                if state.frame_epoch() == epoch {
                    return Ok(state);
                }
                if state.frame_epoch() < epoch {
                    break;
                }
            }
        }
        info!(epoch, "frame epoch not found in history");
        Err(LocError::FrameEpochNotFound(epoch))
    }

    pub fn num_raw_states_with_frame_epoch(&self, epoch: FrameEpoch) -> usize {
        self.raw
            .values()
            .rev()
            .take_while(|s| s.frame_epoch() >= epoch)
            .filter(|s| s.frame_epoch() == epoch)
            .count()
    }

    // ── Retention ───────────────────────────────────────────────────────────

    /// Drop everything strictly older than the newest raw timestamp minus the
    /// window.
    pub fn cull_to_window_size(&mut self) {
        if self.raw.len() < 2 {
            return;
        }
        let Some(newest) = self.newest_timestamp() else {
            return;
        };
        let oldest_allowed = newest.saturating_sub(self.window_ms);
        if oldest_allowed == 0 {
            return;
        }

        self.raw = self.raw.split_off(&oldest_allowed);
        self.vision = self.vision.split_off(&oldest_allowed);
        self.computed = self.computed.split_off(&oldest_allowed);
        let kept_keys = self.key_by_time.split_off(&oldest_allowed);
        for key in self.key_by_time.values() {
            self.time_by_key.remove(key);
        }
        self.key_by_time = kept_keys;
    }

    // ── Introspection ───────────────────────────────────────────────────────

    pub fn num_raw_states(&self) -> usize {
        self.raw.len()
    }

    pub fn num_vision_states(&self) -> usize {
        self.vision.len()
    }

    pub fn num_computed_states(&self) -> usize {
        self.computed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.vision.is_empty()
    }

    pub fn oldest_timestamp(&self) -> Option<TimeStamp> {
        self.raw.first_key_value().map(|(&t, _)| t)
    }

    pub fn newest_timestamp(&self) -> Option<TimeStamp> {
        self.raw.last_key_value().map(|(&t, _)| t)
    }

    pub fn oldest_vision_timestamp(&self) -> Option<TimeStamp> {
        self.vision.first_key_value().map(|(&t, _)| t)
    }

    pub fn newest_vision_timestamp(&self) -> Option<TimeStamp> {
        self.vision.last_key_value().map(|(&t, _)| t)
    }

    pub fn raw_states(&self) -> impl DoubleEndedIterator<Item = (TimeStamp, &HistRobotState)> {
        self.raw.iter().map(|(&t, s)| (t, s))
    }

    /// Human-readable listing of the last `num` raw, vision and computed
    /// states, merged in time order.
    pub fn dump(&self, num: usize) -> String {
        fn recent<'a>(
            map: &'a StateMap,
            kind: &'static str,
            num: usize,
        ) -> Vec<(TimeStamp, &'static str, &'a HistRobotState)> {
            map.iter()
                .rev()
                .take(num)
                .map(|(&t, s)| (t, kind, s))
                .collect()
        }

        let mut lines = recent(&self.raw, "raw", num);
        lines.extend(recent(&self.vision, "vis", num));
        lines.extend(recent(&self.computed, "cmp", num));
        lines.sort_by_key(|(t, kind, _)| (*t, *kind));
        let mut out = format!(
            "StateHistory: {} raw, {} vision, {} computed, window {} ms\n",
            self.raw.len(),
            self.vision.len(),
            self.computed.len(),
            self.window_ms
        );
        for (t, kind, state) in lines {
            out.push_str(&format!("  {t:>8} {kind} {state}\n"));
        }
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
