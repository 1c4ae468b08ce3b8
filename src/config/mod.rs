//! Store configuration.
//!
//! Loaded from YAML files and environment variables. Every field is
//! optional and falls back to the defaults below.

use std::time::Duration;

use serde::Deserialize;

use crate::storage::RetentionSettings;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "session-store.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "SESSION_STORE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "SESSION_STORE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "SESSION_STORE_LOG";
/// Environment variable selecting log output format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "SESSION_STORE_LOG_FORMAT";

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Session event store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Use the durable Redis backend. When false the store runs on the
    /// in-process backend only.
    pub durable_enabled: bool,
    /// Redis connection URL.
    pub redis_url: String,
    /// Namespace prefix for every Redis key.
    pub key_prefix: String,
    /// TTL applied to events stored without an explicit one.
    /// `None` stores events without time-based expiry.
    pub default_ttl_secs: Option<u64>,
    /// Newest events kept per session/stream key.
    pub max_events_per_session: usize,
    /// Serve from the in-process backend when Redis fails.
    pub fallback_enabled: bool,
    /// zstd-compress stored records.
    pub compression: bool,
    /// Ceiling on the Redis connect handshake.
    pub connect_timeout_ms: u64,
    /// Ceiling on each Redis round trip.
    pub operation_timeout_ms: u64,
    /// Minimum spacing of recovery probes while degraded.
    pub recovery_probe_interval_secs: u64,
    /// Records read per key when replaying. Never below
    /// `max_events_per_session`.
    pub replay_fetch_limit: usize,
    /// Spacing of cleanup sweeps in the sweeper binary.
    pub cleanup_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            durable_enabled: true,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "session_events".to_string(),
            default_ttl_secs: Some(3600),
            max_events_per_session: 1000,
            fallback_enabled: true,
            compression: false,
            connect_timeout_ms: 2000,
            operation_timeout_ms: 2000,
            recovery_probe_interval_secs: 30,
            replay_fetch_limit: 10_000,
            cleanup_interval_secs: 300,
        }
    }
}

impl StoreConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `session-store.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, e.g.
    ///    `SESSION_STORE__REDIS_URL`
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: StoreConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events_per_session == 0 {
            return Err(ConfigError::Invalid(
                "max_events_per_session must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "Redis timeouts must be non-zero".to_string(),
            ));
        }
        // A replay reads the whole retained window of a key.
        if self.replay_fetch_limit < self.max_events_per_session {
            return Err(ConfigError::Invalid(format!(
                "replay_fetch_limit ({}) must be at least max_events_per_session ({})",
                self.replay_fetch_limit, self.max_events_per_session
            )));
        }
        Ok(())
    }

    pub fn retention(&self) -> RetentionSettings {
        RetentionSettings {
            max_events_per_session: self.max_events_per_session,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn recovery_probe_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_probe_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Config for tests: in-process only, no TTL.
    pub fn for_test() -> Self {
        Self {
            durable_enabled: false,
            default_ttl_secs: None,
            ..Self::default()
        }
    }
}
