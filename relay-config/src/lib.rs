//! Configuration management for the room relay
//!
//! Settings are read once at startup and never change during a run. Sources,
//! lowest precedence first: built-in defaults, an optional JSON/TOML file,
//! then `RELAY_*` environment variables (a `.env` file is honoured).

use relay_logging::LogFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Largest fixed-size message the relay itself writes: `[addr:16][port:2][tag]`.
pub const MIN_BUFFER_SIZE: usize = 19;

/// Environment variable prefix (`RELAY_LISTEN_PORT`, `RELAY_BANDWIDTH_LIMIT`, ...)
pub const ENV_PREFIX: &str = "RELAY";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to write configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the transport binds to
    pub bind_address: String,
    /// Port the transport listens on
    pub listen_port: u16,
    /// Size of the reusable send/receive buffer in bytes
    pub buffer_size: usize,
    /// Log room lifecycle events at info level
    pub enable_runtime_meta_logging: bool,
    /// Seconds after admission during which the grace limit applies
    pub bandwidth_grace_period_length: u64,
    /// Bytes per second allowed during the grace period (<= 0 disables)
    pub grace_period_bandwidth_limit: i64,
    /// Bytes per second allowed after the grace period (<= 0 disables)
    pub bandwidth_limit: i64,
    /// Allow one-shot buffers for messages that outgrow `buffer_size`
    pub allow_temporary_alloc: bool,
    /// Largest one-shot buffer in bytes
    pub max_temporary_alloc: usize,
    /// Event loop pacing
    pub ticks_per_second: u32,
    /// Tell a new host its public endpoint
    pub report_host_address: bool,
    /// Transport-level idle timeout before a silent connection is dropped
    pub idle_timeout_secs: u64,
    /// Default log level when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            bind_address: "0.0.0.0".to_string(),
            listen_port: 8888,
            buffer_size: 1024 * 8,
            enable_runtime_meta_logging: true,
            bandwidth_grace_period_length: 60,
            grace_period_bandwidth_limit: 4000,
            bandwidth_limit: 2000,
            allow_temporary_alloc: true,
            max_temporary_alloc: 1024 * 64,
            ticks_per_second: 64,
            report_host_address: true,
            idle_timeout_secs: 30,
            log_level: "info".to_string(),
            log_format: LogFormat::Console,
        }
    }
}

impl RelayConfig {
    /// Load configuration from an optional file plus the environment
    ///
    /// A missing file is not an error; defaults fill every absent key.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX).try_parsing(true),
        );

        let config: RelayConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file only, ignoring the environment
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: RelayConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default configuration to `path` as pretty JSON
    pub fn write_default(path: &Path) -> Result<Self, ConfigError> {
        let config = RelayConfig::default();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(&config)?)?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "buffer_size must be at least {} bytes, got {}",
                MIN_BUFFER_SIZE, self.buffer_size
            )));
        }
        if self.ticks_per_second == 0 {
            return Err(ConfigError::Invalid(
                "ticks_per_second must be greater than zero".to_string(),
            ));
        }
        if self.allow_temporary_alloc && self.max_temporary_alloc < self.buffer_size {
            return Err(ConfigError::Invalid(format!(
                "max_temporary_alloc ({}) is smaller than buffer_size ({})",
                self.max_temporary_alloc, self.buffer_size
            )));
        }
        Ok(())
    }

    /// Grace period as a duration
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.bandwidth_grace_period_length)
    }

    /// Time budget of one loop iteration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.ticks_per_second.max(1)))
    }

    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// `bind_address:listen_port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.listen_port)
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        if self.log_level.is_empty() {
            "info"
        } else {
            &self.log_level
        }
    }
}
