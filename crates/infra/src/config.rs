//! Queue configuration: a flat, persisted key/value map with typed setters.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use queuectl_core::DEFAULT_MAX_RETRIES;

/// Typed snapshot of every recognised setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Retry budget for jobs enqueued without one
    pub max_retries: u32,
    /// Retry delay is `backoff_base ^ attempts` seconds
    pub backoff_base: f64,
    /// Idle sleep between polls, seconds
    pub worker_poll_interval: f64,
    /// Per-job execution timeout, seconds
    pub job_timeout: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: 2.0,
            worker_poll_interval: 1.0,
            job_timeout: 300,
        }
    }
}

impl QueueSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.worker_poll_interval).unwrap_or(Duration::from_secs(1))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout)
    }

    fn apply(&mut self, key: ConfigKey, value: &Value) -> Result<(), ConfigError> {
        match key {
            ConfigKey::MaxRetries => {
                self.max_retries = parse_int(value)
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or(ConfigError::invalid(key, "a non-negative integer"))?;
            }
            ConfigKey::BackoffBase => {
                self.backoff_base = parse_float(value)
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .ok_or(ConfigError::invalid(key, "a positive number"))?;
            }
            ConfigKey::WorkerPollInterval => {
                self.worker_poll_interval = parse_float(value)
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .ok_or(ConfigError::invalid(key, "a positive number of seconds"))?;
            }
            ConfigKey::JobTimeout => {
                self.job_timeout = parse_int(value)
                    .filter(|v| *v > 0)
                    .ok_or(ConfigError::invalid(key, "a positive integer number of seconds"))?;
            }
        }
        Ok(())
    }
}

fn parse_int(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Recognised configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    MaxRetries,
    BackoffBase,
    WorkerPollInterval,
    JobTimeout,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 4] = [
        ConfigKey::MaxRetries,
        ConfigKey::BackoffBase,
        ConfigKey::WorkerPollInterval,
        ConfigKey::JobTimeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::MaxRetries => "max_retries",
            ConfigKey::BackoffBase => "backoff_base",
            ConfigKey::WorkerPollInterval => "worker_poll_interval",
            ConfigKey::JobTimeout => "job_timeout",
        }
    }
}

impl core::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts snake_case and kebab-case spellings.
impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        ConfigKey::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),
    #[error("{key} must be {expected}")]
    InvalidValue {
        key: ConfigKey,
        expected: &'static str,
    },
    #[error("failed to save configuration to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode configuration: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("configuration lock poisoned")]
    Poisoned,
}

impl ConfigError {
    fn invalid(key: ConfigKey, expected: &'static str) -> Self {
        Self::InvalidValue { key, expected }
    }
}

/// Live configuration shared by the context and every worker.
///
/// Backed by a JSON file when opened with [`Config::load`]; values persisted
/// there are merged over the defaults.
#[derive(Debug)]
pub struct Config {
    path: Option<PathBuf>,
    settings: RwLock<QueueSettings>,
}

impl Config {
    /// Load from `path`. A missing or unreadable file yields the defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "config file invalid; using defaults");
                QueueSettings::default()
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => QueueSettings::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "config file unreadable; using defaults");
                QueueSettings::default()
            }
        };

        Self {
            path: Some(path),
            settings: RwLock::new(settings),
        }
    }

    /// In-memory configuration that is never written to disk.
    pub fn ephemeral(settings: QueueSettings) -> Self {
        Self {
            path: None,
            settings: RwLock::new(settings),
        }
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> QueueSettings {
        match self.settings.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn get_all(&self) -> QueueSettings {
        self.settings()
    }

    pub fn get(&self, key: ConfigKey) -> Value {
        let s = self.settings();
        match key {
            ConfigKey::MaxRetries => Value::from(s.max_retries),
            ConfigKey::BackoffBase => Value::from(s.backoff_base),
            ConfigKey::WorkerPollInterval => Value::from(s.worker_poll_interval),
            ConfigKey::JobTimeout => Value::from(s.job_timeout),
        }
    }

    /// Type-check and persist a single setting.
    ///
    /// On any error the live settings are left unchanged.
    pub fn set(&self, key: &str, value: &Value) -> Result<QueueSettings, ConfigError> {
        let key: ConfigKey = key.parse()?;
        let mut guard = self.settings.write().map_err(|_| ConfigError::Poisoned)?;

        let mut next = guard.clone();
        next.apply(key, value)?;
        self.persist(&next)?;
        *guard = next.clone();

        info!(key = %key, value = %value, "configuration updated");
        Ok(next)
    }

    /// Restore and persist the defaults.
    pub fn reset(&self) -> Result<QueueSettings, ConfigError> {
        let mut guard = self.settings.write().map_err(|_| ConfigError::Poisoned)?;
        let defaults = QueueSettings::default();
        self.persist(&defaults)?;
        *guard = defaults.clone();
        info!("configuration reset to defaults");
        Ok(defaults)
    }

    fn persist(&self, settings: &QueueSettings) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(settings)?).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::ephemeral(QueueSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Config::default().settings();
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.backoff_base, 2.0);
        assert_eq!(s.worker_poll_interval, 1.0);
        assert_eq!(s.job_timeout, 300);
        assert_eq!(s.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn keys_accept_kebab_case() {
        assert_eq!("max-retries".parse::<ConfigKey>().unwrap(), ConfigKey::MaxRetries);
        assert_eq!("job_timeout".parse::<ConfigKey>().unwrap(), ConfigKey::JobTimeout);
        assert!(matches!(
            "colour".parse::<ConfigKey>(),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn setters_are_type_checked() {
        let config = Config::default();

        config.set("max-retries", &json!(5)).unwrap();
        config.set("backoff_base", &json!("1.5")).unwrap();
        config.set("worker-poll-interval", &json!(0.25)).unwrap();
        config.set("job_timeout", &json!("60")).unwrap();

        let s = config.settings();
        assert_eq!(s.max_retries, 5);
        assert_eq!(s.backoff_base, 1.5);
        assert_eq!(s.worker_poll_interval, 0.25);
        assert_eq!(s.job_timeout, 60);

        for (key, value) in [
            ("max_retries", json!(2.5)),
            ("max_retries", json!(-1)),
            ("job_timeout", json!(0)),
            ("backoff_base", json!("fast")),
            ("worker_poll_interval", json!(true)),
        ] {
            assert!(matches!(
                config.set(key, &value),
                Err(ConfigError::InvalidValue { .. })
            ));
        }
        assert_eq!(config.settings(), s);

        assert!(matches!(
            config.set("retries", &json!(1)),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn values_persist_and_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load(&path);
        config.set("max_retries", &json!(7)).unwrap();

        let reloaded = Config::load(&path);
        assert_eq!(reloaded.settings().max_retries, 7);
        assert_eq!(reloaded.settings().job_timeout, 300);

        fs::write(&path, r#"{"job_timeout": 10}"#).unwrap();
        let partial = Config::load(&path).settings();
        assert_eq!(partial.job_timeout, 10);
        assert_eq!(partial.max_retries, 3);

        reloaded.reset().unwrap();
        assert_eq!(Config::load(&path).settings(), QueueSettings::default());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "][").unwrap();
        assert_eq!(Config::load(&path).settings(), QueueSettings::default());
    }

    #[test]
    fn get_returns_json_values() {
        let config = Config::default();
        assert_eq!(config.get(ConfigKey::MaxRetries), json!(3));
        assert_eq!(config.get(ConfigKey::BackoffBase), json!(2.0));
    }
}
