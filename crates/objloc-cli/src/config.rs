//! Node configuration – reads/writes `~/.objloc/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use objloc_perception::camera::CameraModel;
use objloc_perception::twin_view::{FusionKeying, FusionPolicy};
use objloc_runtime::{FusionMode, LocalizeTrigger, OrchestratorConfig, PlaneFitterKind};
use serde::{Deserialize, Serialize};

/// Persisted configuration stored in `~/.objloc/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// `single_view` or `twin_view`.
    #[serde(default)]
    pub mode: FusionMode,

    /// `on_readiness` or `on_frame`.
    #[serde(default)]
    pub trigger: LocalizeTrigger,

    /// Depth band kept above the nearest surface (metres).
    #[serde(default = "default_segment_threshold")]
    pub segment_threshold: f32,

    #[serde(default = "default_pose_stream")]
    pub pose_stream: String,

    /// Cached clouds older than this are not localized. `0` disables the
    /// check.
    #[serde(default = "default_max_frame_age_ms")]
    pub max_frame_age_ms: u64,

    #[serde(default)]
    pub plane_fitter: PlaneFitterKind,

    /// Capacity of each event-bus topic channel.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Inbound messages buffered ahead of the node. A full queue makes the
    /// reader wait.
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    #[serde(default)]
    pub fusion_policy: FusionPolicy,

    #[serde(default)]
    pub fusion_keying: FusionKeying,

    #[serde(default)]
    pub camera: CameraModel,
}

fn default_segment_threshold() -> f32 {
    0.3
}
fn default_pose_stream() -> String {
    "middle_pose".to_string()
}
fn default_max_frame_age_ms() -> u64 {
    1000
}
fn default_bus_capacity() -> usize {
    64
}
fn default_inbound_capacity() -> usize {
    objloc_middleware::DEFAULT_INBOUND_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: FusionMode::default(),
            trigger: LocalizeTrigger::default(),
            segment_threshold: default_segment_threshold(),
            pose_stream: default_pose_stream(),
            max_frame_age_ms: default_max_frame_age_ms(),
            plane_fitter: PlaneFitterKind::default(),
            bus_capacity: default_bus_capacity(),
            inbound_capacity: default_inbound_capacity(),
            fusion_policy: FusionPolicy::default(),
            fusion_keying: FusionKeying::default(),
            camera: CameraModel::default(),
        }
    }
}

impl Config {
    /// Translate into the runtime's configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            mode: self.mode,
            trigger: self.trigger,
            segment_threshold: self.segment_threshold,
            pose_stream: self.pose_stream.clone(),
            max_frame_age: (self.max_frame_age_ms > 0)
                .then(|| Duration::from_millis(self.max_frame_age_ms)),
            fusion_policy: self.fusion_policy,
            fusion_keying: self.fusion_keying,
            plane_fitter: self.plane_fitter,
            camera: self.camera,
        }
    }
}

/// Return the path to `~/.objloc/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".objloc").join("config.toml")
}

/// Load the effective configuration: the file when present, otherwise the
/// defaults, with `OBJLOC_*` overrides applied on top.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Like [`load`], but reports a broken file on stderr and continues with the
/// defaults (still applying `OBJLOC_*` overrides).
pub fn load_or_default() -> Config {
    load().unwrap_or_else(|e| {
        eprintln!("Config error: {e}");
        eprintln!("  Using default configuration.");
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        cfg
    })
}

/// Load the config from a specific path. Returns `None` if the file does not
/// exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `OBJLOC_*` environment variable overrides to `cfg`. Unparseable
/// values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `OBJLOC_MODE` | `mode` (`single_view` / `twin_view`) |
/// | `OBJLOC_THRESHOLD` | `segment_threshold` |
/// | `OBJLOC_IMAGE_HEIGHT` | `camera.image_height` |
/// | `OBJLOC_MAX_FRAME_AGE_MS` | `max_frame_age_ms` |
/// | `OBJLOC_POSE_STREAM` | `pose_stream` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("OBJLOC_MODE") {
        match v.as_str() {
            "single_view" => cfg.mode = FusionMode::SingleView,
            "twin_view" => cfg.mode = FusionMode::TwinView,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("OBJLOC_THRESHOLD")
        && let Ok(t) = v.parse::<f32>()
    {
        cfg.segment_threshold = t;
    }
    if let Ok(v) = std::env::var("OBJLOC_IMAGE_HEIGHT")
        && let Ok(h) = v.parse::<u32>()
    {
        cfg.camera.image_height = h;
    }
    if let Ok(v) = std::env::var("OBJLOC_MAX_FRAME_AGE_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.max_frame_age_ms = ms;
    }
    if let Ok(v) = std::env::var("OBJLOC_POSE_STREAM") {
        cfg.pose_stream = v;
    }
}

/// Save the config to disk, creating `~/.objloc/` if necessary.
pub fn save(cfg: &Config) -> Result<PathBuf, String> {
    let path = config_path();
    save_to(cfg, &path)?;
    Ok(path)
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, Config::default());
        assert_eq!(loaded.pose_stream, "middle_pose");
        assert_eq!(loaded.camera.image_height, 376);
    }

    #[test]
    fn roundtrip_non_default_variants() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        let cfg = Config {
            mode: FusionMode::TwinView,
            fusion_policy: FusionPolicy::Persistent { max_entries: 32 },
            fusion_keying: FusionKeying::LabelAndBucket { bucket_size: 0.5 },
            plane_fitter: PlaneFitterKind::Pca,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");
        assert_eq!(load_from(&path).unwrap().unwrap(), cfg);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "mode = \"twin_view\"\nsegment_threshold = 0.5\n\n[camera]\nimage_height = 720\n",
        )
        .unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.mode, FusionMode::TwinView);
        assert_eq!(cfg.segment_threshold, 0.5);
        assert_eq!(cfg.camera.image_height, 720);
        assert_eq!(cfg.camera.image_width, 672);
        assert_eq!(cfg.max_frame_age_ms, 1000);
        assert_eq!(cfg.fusion_policy, FusionPolicy::PerBatch);
        assert_eq!(cfg.inbound_capacity, 64);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "mode = 7").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_objloc_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.objloc/config.toml"));
    }

    #[test]
    fn zero_frame_age_disables_staleness() {
        let cfg = Config {
            max_frame_age_ms: 0,
            ..Config::default()
        };
        assert!(cfg.orchestrator_config().max_frame_age.is_none());
        assert_eq!(
            Config::default().orchestrator_config().max_frame_age,
            Some(Duration::from_millis(1000))
        );
    }

    #[test]
    fn apply_env_overrides_changes_mode() {
        // SAFETY: single-threaded test; no other test reads this variable.
        unsafe { std::env::set_var("OBJLOC_MODE", "twin_view") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.mode, FusionMode::TwinView);
        unsafe { std::env::remove_var("OBJLOC_MODE") };
    }

    #[test]
    fn apply_env_overrides_changes_image_height() {
        // SAFETY: single-threaded test; no other test reads this variable.
        unsafe { std::env::set_var("OBJLOC_IMAGE_HEIGHT", "480") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.camera.image_height, 480);
        unsafe { std::env::remove_var("OBJLOC_IMAGE_HEIGHT") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_threshold() {
        // SAFETY: single-threaded test; no other test reads this variable.
        unsafe { std::env::set_var("OBJLOC_THRESHOLD", "deep") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.segment_threshold, 0.3);
        unsafe { std::env::remove_var("OBJLOC_THRESHOLD") };
    }

    #[test]
    fn apply_env_overrides_changes_pose_stream() {
        // SAFETY: single-threaded test; no other test reads this variable.
        unsafe { std::env::set_var("OBJLOC_POSE_STREAM", "left_pose") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.pose_stream, "left_pose");
        unsafe { std::env::remove_var("OBJLOC_POSE_STREAM") };
    }
}
