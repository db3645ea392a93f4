//! `relocus-history` – the robot's recent past.
//!
//! # Modules
//!
//! - [`state`] – [`HistRobotState`][state::HistRobotState]: one snapshot of
//!   pose, frame epoch, actuator angles and sensor summary, plus the blend
//!   used between two snapshots.
//! - [`projection`] – [`project_forward`][projection::project_forward]: the
//!   pure function that carries a vision keyframe forward through raw
//!   odometry spanning several frame epochs.
//! - [`history`] – [`StateHistory`][history::StateHistory]: the windowed store
//!   of raw, vision and computed states.

pub mod history;
pub mod projection;
pub mod state;

pub use history::{DEFAULT_WINDOW_MS, HistStateKey, StateHistory};
pub use projection::project_forward;
pub use state::HistRobotState;
