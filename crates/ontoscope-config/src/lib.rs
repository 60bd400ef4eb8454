//! Configuration loading for applications that embed an ontoscope client.
//!
//! Reads a TOML file from the platform config directory, overlays
//! `ONTOSCOPE_`-prefixed environment variables, and translates the result
//! into an `ontoscope_core::StoreConfig`. Also sets up `tracing` output.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use ontoscope_core::StoreConfig;

mod logging;

pub use logging::init_tracing;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("tracing already initialised: {0}")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Cache tuning. Durations use humantime syntax ("90s", "2m 30s").
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheSettings {
    /// How long an unobserved key survives. "0s" cleans up immediately.
    #[serde(default = "default_gc_delay")]
    pub gc_delay: String,

    #[serde(default = "default_max_optimistic_layers")]
    pub max_optimistic_layers: usize,

    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Loaded entries younger than this are served without refetching.
    #[serde(default = "default_dedupe_interval")]
    pub dedupe_interval: String,

    #[serde(default = "default_revalidate_after_action")]
    pub revalidate_after_action: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            gc_delay: default_gc_delay(),
            max_optimistic_layers: default_max_optimistic_layers(),
            default_page_size: default_page_size(),
            dedupe_interval: default_dedupe_interval(),
            revalidate_after_action: default_revalidate_after_action(),
        }
    }
}

fn default_gc_delay() -> String {
    "60s".into()
}
fn default_max_optimistic_layers() -> usize {
    StoreConfig::default().max_optimistic_layers
}
fn default_page_size() -> usize {
    StoreConfig::default().default_page_size
}
fn default_dedupe_interval() -> String {
    "2s".into()
}
fn default_revalidate_after_action() -> bool {
    true
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_level() -> String {
    "warn".into()
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Validate the cache settings and build the core's runtime config.
    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        let cache = &self.cache;
        if cache.default_page_size == 0 {
            return Err(ConfigError::Validation {
                field: "cache.default_page_size".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(StoreConfig {
            gc_delay: parse_duration("cache.gc_delay", &cache.gc_delay)?,
            max_optimistic_layers: cache.max_optimistic_layers,
            default_page_size: cache.default_page_size,
            dedupe_interval: parse_duration("cache.dedupe_interval", &cache.dedupe_interval)?,
            revalidate_after_action: cache.revalidate_after_action,
        })
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|err| ConfigError::Validation {
        field: field.into(),
        reason: format!("'{value}' is not a duration: {err}"),
    })
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "ontoscope", "ontoscope").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("ontoscope");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load config from the platform path and the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from defaults, then `path` (if it exists), then the
/// environment. Nested keys use a double underscore:
/// `ONTOSCOPE_CACHE__GC_DELAY=5m`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ONTOSCOPE_").split("__"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Load config, falling back to defaults when it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_core_defaults() {
        let store = Config::default().store_config().unwrap();
        let core = StoreConfig::default();
        assert_eq!(store, core);
    }

    #[test]
    fn file_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [cache]
                gc_delay = "5m"
                default_page_size = 25

                [logging]
                format = "json"
                "#,
            )?;
            jail.set_env("ONTOSCOPE_CACHE__DEFAULT_PAGE_SIZE", "50");

            let config = load_config_from(Path::new("config.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.cache.gc_delay, "5m");
            assert_eq!(config.cache.default_page_size, 50);
            assert_eq!(config.logging.format, LogFormat::Json);
            assert_eq!(config.logging.level, "warn");

            let store = config.store_config().map_err(|e| e.to_string())?;
            assert_eq!(store.gc_delay, Duration::from_secs(300));
            assert_eq!(store.dedupe_interval, Duration::from_secs(2));
            Ok(())
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        // Inside a jail so env overrides from other tests cannot leak in.
        Jail::expect_with(|_| {
            let dir = tempfile::tempdir().unwrap();
            let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn rejects_bad_duration() {
        let mut config = Config::default();
        config.cache.dedupe_interval = "soon".into();
        let err = config.store_config().unwrap_err();
        assert!(
            matches!(&err, ConfigError::Validation { field, .. } if field == "cache.dedupe_interval"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn rejects_zero_page_size() {
        let mut config = Config::default();
        config.cache.default_page_size = 0;
        assert!(config.store_config().is_err());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.cache.gc_delay = "0s".into();
        config.cache.revalidate_after_action = false;

        save_config(&config, &path).unwrap();
        Jail::expect_with(|_| {
            let loaded = load_config_from(&path).unwrap();
            assert_eq!(loaded, config);
            assert_eq!(loaded.store_config().unwrap().gc_delay, Duration::ZERO);
            Ok(())
        });
    }
}
