use rollcall_core::detector::{DEFAULT_INPUT_SIZE, DEFAULT_SCORE_THRESHOLD};
use rollcall_core::{DetectorOptions, ModelSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Points at a TOML file overlaid on the defaults before env overrides.
pub const CONFIG_ENV: &str = "ROLLCALL_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Kiosk configuration: defaults, then an optional TOML file, then `ROLLCALL_*` env vars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Roster backend base URL.
    pub api_base: String,
    /// Where the capability bundle is served from.
    pub models_base: String,
    /// V4L2 device path.
    pub camera_device: String,
    /// Class scope sent with identify calls.
    pub class_id: Option<String>,
    /// Ask the backend to mark attendance as part of identify.
    pub mark_present: bool,
    /// Confirmation auto-hide in milliseconds; 0 disables it.
    pub auto_hide_ms: u64,
    pub input_size: u32,
    pub score_threshold: f32,
    pub request_timeout_secs: u64,
    /// Origin the shell assets are fetched from.
    pub shell_origin: String,
    pub cache_dir: PathBuf,
    pub cache_prefix: String,
    pub cache_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:4000".to_string(),
            models_base: "/models".to_string(),
            camera_device: "/dev/video0".to_string(),
            class_id: None,
            mark_present: false,
            auto_hide_ms: 6000,
            input_size: DEFAULT_INPUT_SIZE,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            request_timeout_secs: 10,
            shell_origin: "http://127.0.0.1:5173".to_string(),
            cache_dir: default_cache_dir(),
            cache_prefix: "app-cache".to_string(),
            cache_version: "v1".to_string(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".cache")
        })
        .join("rollcall")
        .join("shell")
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `ROLLCALL_*` overrides. Unparseable values keep the current setting.
    pub fn apply_env_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("ROLLCALL_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = var("ROLLCALL_MODELS_BASE") {
            self.models_base = v;
        }
        if let Some(v) = var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("ROLLCALL_CLASS_ID") {
            self.class_id = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = var("ROLLCALL_MARK_PRESENT") {
            self.mark_present = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        self.auto_hide_ms = parsed(&var, "ROLLCALL_AUTO_HIDE_MS", self.auto_hide_ms);
        self.input_size = parsed(&var, "ROLLCALL_INPUT_SIZE", self.input_size);
        self.score_threshold = parsed(&var, "ROLLCALL_SCORE_THRESHOLD", self.score_threshold);
        self.request_timeout_secs =
            parsed(&var, "ROLLCALL_REQUEST_TIMEOUT_SECS", self.request_timeout_secs);
        if let Some(v) = var("ROLLCALL_SHELL_ORIGIN") {
            self.shell_origin = v;
        }
        if let Some(v) = var("ROLLCALL_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_CACHE_PREFIX") {
            self.cache_prefix = v;
        }
        if let Some(v) = var("ROLLCALL_CACHE_VERSION") {
            self.cache_version = v;
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            input_size: self.input_size,
            score_threshold: self.score_threshold,
        }
    }

    pub fn model_source(&self) -> ModelSource {
        ModelSource::new(self.models_base.clone())
    }

    pub fn auto_hide(&self) -> Duration {
        Duration::from_millis(self.auto_hide_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable override");
            current
        }),
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.api_base, "http://127.0.0.1:4000");
        assert_eq!(c.models_base, "/models");
        assert_eq!(c.auto_hide(), Duration::from_millis(6000));
        assert_eq!(c.detector_options(), DetectorOptions::default());
        assert!(c.class_id.is_none());
        assert!(!c.mark_present);
    }

    #[test]
    fn test_toml_overlay_keeps_unset_defaults() {
        let c = Config::from_toml_str(
            r#"
            api_base = "https://roster.example"
            class_id = "CS-101"
            auto_hide_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(c.api_base, "https://roster.example");
        assert_eq!(c.class_id.as_deref(), Some("CS-101"));
        assert!(c.auto_hide().is_zero());
        assert_eq!(c.input_size, 224);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            Config::from_toml_str("auto_hide_ms = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_env_from(env(&[
            ("ROLLCALL_API_BASE", "http://10.0.0.5:4000"),
            ("ROLLCALL_MARK_PRESENT", "1"),
            ("ROLLCALL_SCORE_THRESHOLD", "0.7"),
            ("ROLLCALL_AUTO_HIDE_MS", "2500"),
        ]));
        assert_eq!(c.api_base, "http://10.0.0.5:4000");
        assert!(c.mark_present);
        assert_eq!(c.score_threshold, 0.7);
        assert_eq!(c.auto_hide_ms, 2500);
    }

    #[test]
    fn test_env_garbage_keeps_current() {
        let mut c = Config::default();
        c.apply_env_from(env(&[
            ("ROLLCALL_INPUT_SIZE", "big"),
            ("ROLLCALL_CLASS_ID", ""),
        ]));
        assert_eq!(c.input_size, 224);
        assert!(c.class_id.is_none());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "camera_device = \"/dev/video4\"\n").unwrap();
        assert_eq!(Config::from_file(&path).unwrap().camera_device, "/dev/video4");
        assert!(matches!(
            Config::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
