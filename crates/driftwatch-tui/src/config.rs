//! Startup configuration: TOML file, environment, CLI overrides.
//!
//! Everything is resolved once here and captured into plain values passed
//! to the components at construction; nothing reads ambient state later.

use driftwatch_engine::{
    SyncTunables, DEFAULT_BACKOFF_CAP, DEFAULT_BACKOFF_FLOOR, DEFAULT_CONCURRENCY,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 100;
pub const DEFAULT_DIFF_BUDGET_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no server url configured; set [server] url in the config file, --url, or DRIFTWATCH_URL")]
    MissingUrl,
}

/// Values the CLI may override on top of file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub server: ServerSection,
    pub sync: SyncSection,
    pub ui: UiSection,
    pub cache: CacheSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub poll_interval_secs: Option<u64>,
    pub concurrency: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub backoff_floor_secs: Option<u64>,
    pub backoff_cap_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UiSection {
    pub frame_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub diff_budget_bytes: Option<usize>,
}

/// Fully resolved startup configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
    pub tunables: SyncTunables,
    pub frame_interval: Duration,
    pub diff_budget_bytes: usize,
}

impl Settings {
    pub fn load(explicit_path: Option<PathBuf>, overrides: Overrides) -> Result<Self, ConfigError> {
        let file = match &explicit_path {
            Some(path) => FileSettings::read(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => FileSettings::read(&path)?,
                _ => FileSettings::default(),
            },
        };
        Self::merge(file, overrides)
    }

    /// Precedence per value: CLI flag, then environment, then file, then
    /// the built-in default.
    pub fn merge(file: FileSettings, overrides: Overrides) -> Result<Self, ConfigError> {
        let server_url = overrides
            .url
            .or_else(|| env_var("DRIFTWATCH_URL"))
            .or(file.server.url)
            .ok_or(ConfigError::MissingUrl)?;
        let api_key = overrides
            .api_key
            .or_else(|| env_var("DRIFTWATCH_API_KEY"))
            .or(file.server.api_key)
            .unwrap_or_default();

        let poll_interval = overrides
            .poll_interval_secs
            .or(file.sync.poll_interval_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let concurrency = overrides
            .concurrency
            .or(file.sync.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY)
            .max(1);
        let tunables = SyncTunables {
            poll_interval,
            concurrency,
            backoff_floor: file
                .sync
                .backoff_floor_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_BACKOFF_FLOOR),
            backoff_cap: file
                .sync
                .backoff_cap_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_BACKOFF_CAP),
            max_attempts: file.sync.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
        };

        Ok(Self {
            server_url,
            api_key,
            request_timeout: Duration::from_secs(
                file.sync
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            tunables,
            frame_interval: Duration::from_millis(
                file.ui.frame_interval_ms.unwrap_or(DEFAULT_FRAME_INTERVAL_MS),
            ),
            diff_budget_bytes: file
                .cache
                .diff_budget_bytes
                .unwrap_or(DEFAULT_DIFF_BUDGET_BYTES),
        })
    }
}

impl FileSettings {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("driftwatch").join("config.toml"))
}

fn env_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with_url() -> FileSettings {
        toml::from_str(
            r#"
            [server]
            url = "https://cd.example.com/api/v1"
            api_key = "file-key"

            [sync]
            poll_interval_secs = 120
            concurrency = 6
            backoff_floor_secs = 2
            backoff_cap_secs = 30
            max_attempts = 3

            [ui]
            frame_interval_ms = 50

            [cache]
            diff_budget_bytes = 4096
            "#,
        )
        .expect("fixture parses")
    }

    #[test]
    fn full_file_parses_into_every_section() {
        let settings = Settings::merge(file_with_url(), Overrides::default()).expect("valid");
        assert_eq!(settings.server_url, "https://cd.example.com/api/v1");
        assert_eq!(settings.api_key, "file-key");
        assert_eq!(settings.tunables.poll_interval, Duration::from_secs(120));
        assert_eq!(settings.tunables.concurrency, 6);
        assert_eq!(settings.tunables.backoff_floor, Duration::from_secs(2));
        assert_eq!(settings.tunables.backoff_cap, Duration::from_secs(30));
        assert_eq!(settings.tunables.max_attempts, 3);
        assert_eq!(settings.frame_interval, Duration::from_millis(50));
        assert_eq!(settings.diff_budget_bytes, 4096);
    }

    #[test]
    fn unset_fields_fall_back_to_defaults() {
        let file: FileSettings = toml::from_str(
            r#"
            [server]
            url = "https://cd.example.com"
            "#,
        )
        .expect("parses");
        let settings = Settings::merge(file, Overrides::default()).expect("valid");
        assert_eq!(settings.tunables.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(settings.tunables.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(
            settings.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
        assert_eq!(settings.diff_budget_bytes, DEFAULT_DIFF_BUDGET_BYTES);
        assert_eq!(settings.api_key, "");
    }

    #[test]
    fn cli_overrides_beat_the_file() {
        let overrides = Overrides {
            url: Some("https://other.example.com".to_string()),
            api_key: Some("cli-key".to_string()),
            poll_interval_secs: Some(30),
            concurrency: Some(2),
        };
        let settings = Settings::merge(file_with_url(), overrides).expect("valid");
        assert_eq!(settings.server_url, "https://other.example.com");
        assert_eq!(settings.api_key, "cli-key");
        assert_eq!(settings.tunables.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.tunables.concurrency, 2);
    }

    #[test]
    fn missing_url_everywhere_is_an_error() {
        match Settings::merge(FileSettings::default(), Overrides::default()) {
            Err(ConfigError::MissingUrl) => {}
            other => panic!("expected missing-url error, got {other:?}"),
        }
    }

    #[test]
    fn zero_concurrency_is_clamped_to_one() {
        let mut file = file_with_url();
        file.sync.concurrency = Some(0);
        let settings = Settings::merge(file, Overrides::default()).expect("valid");
        assert_eq!(settings.tunables.concurrency, 1);
    }

    #[test]
    fn garbled_file_is_a_parse_error() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("driftwatch-config-test-{}.toml", std::process::id()));
        std::fs::write(&path, "[server\nurl=").expect("write fixture");
        match FileSettings::read(&path) {
            Err(ConfigError::Parse { .. }) => {}
            other => panic!("expected parse error, got {other:?}"),
        }
        let _ = std::fs::remove_file(&path);
    }
}
