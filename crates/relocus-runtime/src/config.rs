//! Tunables of the localization coordinator.

use relocus_history::DEFAULT_WINDOW_MS;
use serde::{Deserialize, Serialize};

/// Tick-level knobs. Every field has a default, so a partial TOML table is
/// enough to override one of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Retention window of the state history.
    #[serde(default = "default_history_window_ms")]
    pub history_window_ms: u32,

    /// Consecutive mismatched-epoch ticks tolerated before delocalizing.
    #[serde(default = "default_max_mismatched_epoch_ticks")]
    pub max_mismatched_epoch_ticks: u32,

    /// Weight of a freshly computed height when already localized.
    #[serde(default = "default_z_update_weight")]
    pub z_update_weight: f32,

    /// Forward offset from the robot origin to its drive centre, used while
    /// not carrying anything.
    #[serde(default = "default_drive_center_offset_mm")]
    pub drive_center_offset_mm: f32,
}

fn default_history_window_ms() -> u32 {
    DEFAULT_WINDOW_MS
}

fn default_max_mismatched_epoch_ticks() -> u32 {
    100
}

fn default_z_update_weight() -> f32 {
    0.1
}

fn default_drive_center_offset_mm() -> f32 {
    -20.0
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            history_window_ms: default_history_window_ms(),
            max_mismatched_epoch_ticks: default_max_mismatched_epoch_ticks(),
            z_update_weight: default_z_update_weight(),
            drive_center_offset_mm: default_drive_center_offset_mm(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_takes_all_defaults() {
        let cfg: CoordinatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, CoordinatorConfig::default());
        assert_eq!(cfg.history_window_ms, 3000);
        assert_eq!(cfg.max_mismatched_epoch_ticks, 100);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let cfg: CoordinatorConfig =
            serde_json::from_str(r#"{"z_update_weight": 0.5}"#).unwrap();
        assert!((cfg.z_update_weight - 0.5).abs() < f32::EPSILON);
        assert!((cfg.drive_center_offset_mm + 20.0).abs() < f32::EPSILON);
    }
}
