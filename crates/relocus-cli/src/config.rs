//! Configuration vault – reads/writes `~/.relocus/config.toml`.

use relocus_runtime::CoordinatorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted settings for the `relocus` binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator tunables, stored under `[coordinator]`.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Entries per collection printed by the final history dump of a replay.
    #[serde(default = "default_history_dump_depth")]
    pub history_dump_depth: usize,

    /// Name stamped on every emitted event.
    #[serde(default = "default_event_source")]
    pub event_source: String,
}

fn default_history_dump_depth() -> usize {
    10
}

fn default_event_source() -> String {
    "relocus".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            history_dump_depth: default_history_dump_depth(),
            event_source: default_event_source(),
        }
    }
}

/// Return the path to `~/.relocus/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".relocus").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load from disk, falling back to defaults. Environment overrides apply
/// either way.
pub fn load_or_default() -> Result<Config, String> {
    match load()? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `RELOCUS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RELOCUS_HISTORY_WINDOW_MS` | `coordinator.history_window_ms` |
/// | `RELOCUS_MAX_MISMATCH_TICKS` | `coordinator.max_mismatched_epoch_ticks` |
/// | `RELOCUS_Z_UPDATE_WEIGHT` | `coordinator.z_update_weight` (0..=1) |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("RELOCUS_HISTORY_WINDOW_MS")
        && let Ok(ms) = v.parse::<u32>()
    {
        cfg.coordinator.history_window_ms = ms;
    }
    if let Ok(v) = std::env::var("RELOCUS_MAX_MISMATCH_TICKS")
        && let Ok(ticks) = v.parse::<u32>()
    {
        cfg.coordinator.max_mismatched_epoch_ticks = ticks;
    }
    if let Ok(v) = std::env::var("RELOCUS_Z_UPDATE_WEIGHT")
        && let Ok(w) = v.parse::<f32>()
        && (0.0..=1.0).contains(&w)
    {
        cfg.coordinator.z_update_weight = w;
    }
}

/// Save the config to disk, creating `~/.relocus/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Write to a sibling temp file and rename it over `path`, so a crash never
/// leaves a half-written config behind.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    let tmp = path.with_extension("toml.tmp");

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(&tmp)
        .and_then(|mut f| {
            use std::io::Write;
            f.write_all(raw.as_bytes())?;
            f.sync_all()
        })
        .map_err(|e| format!("Failed to write config at {}: {}", tmp.display(), e))?;

    fs::rename(&tmp, path)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn roundtrip_custom_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.coordinator.history_window_ms = 1500;
        cfg.history_dump_depth = 3;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.coordinator.history_window_ms, 1500);
        assert_eq!(loaded.coordinator.max_mismatched_epoch_ticks, 100);
        assert_eq!(loaded.history_dump_depth, 3);
        assert_eq!(loaded.event_source, "relocus");
    }

    #[test]
    fn partial_file_takes_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[coordinator]\nz_update_weight = 0.25\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert!((loaded.coordinator.z_update_weight - 0.25).abs() < 1e-6);
        assert_eq!(loaded.coordinator.history_window_ms, 3000);
        assert_eq!(loaded.history_dump_depth, 10);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "coordinator = 7").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"));
    }

    #[test]
    fn config_path_points_to_relocus_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".relocus"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_history_window() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RELOCUS_HISTORY_WINDOW_MS", "750") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.coordinator.history_window_ms, 750);
        unsafe { std::env::remove_var("RELOCUS_HISTORY_WINDOW_MS") };
    }

    #[test]
    fn apply_env_overrides_changes_mismatch_ticks() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RELOCUS_MAX_MISMATCH_TICKS", "12") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.coordinator.max_mismatched_epoch_ticks, 12);
        unsafe { std::env::remove_var("RELOCUS_MAX_MISMATCH_TICKS") };
    }

    #[test]
    fn apply_env_overrides_rejects_out_of_range_weight() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RELOCUS_Z_UPDATE_WEIGHT", "1.5") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!((cfg.coordinator.z_update_weight - 0.1).abs() < 1e-6);
        unsafe { std::env::remove_var("RELOCUS_Z_UPDATE_WEIGHT") };
    }
}
