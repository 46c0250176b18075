//! Hub configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! TOML file, then `VSERIAL_*` environment variables. Nested keys use a
//! double underscore, e.g. `VSERIAL_PAIR__BUFFER_CAPACITY=8192`.

use crate::error::HubError;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use null_modem::PairConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "VSERIAL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Maximum log level (default: "info")
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
    /// Virtual pair settings
    pub pair: PairConfig,
    /// Bytes moved per relay read (default: 4096)
    pub relay_buffer_size: usize,
    /// Back-off before retrying a short write into a full virtual port (ms)
    pub poll_interval_ms: u64,
    /// Give up on a virtual write after this long without progress (ms)
    pub write_stall_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            pair: PairConfig::default(),
            relay_buffer_size: 4096,
            poll_interval_ms: 100,
            write_stall_ms: 5000,
        }
    }
}

impl HubConfig {
    /// Load from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self, HubError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        Self::build(builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        ))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, HubError> {
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn write_stall_timeout(&self) -> Duration {
        Duration::from_millis(self.write_stall_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
        assert_eq!(config.pair.buffer_capacity, 4096);
        assert_eq!(config.relay_buffer_size, 4096);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.write_stall_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let toml = r#"
            log_level = "debug"
            poll_interval_ms = 25

            [pair]
            buffer_capacity = 8192
        "#;
        let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        let config = HubConfig::build(builder).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.poll_interval_ms, 25);
        assert_eq!(config.pair.buffer_capacity, 8192);
        assert_eq!(config.pair.default_read_timeout_ms, 1000);
        assert_eq!(config.relay_buffer_size, 4096);
    }

    #[test]
    fn test_empty_sources_give_defaults() {
        let config = HubConfig::build(Config::builder()).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.pair.default_read_timeout_ms, 1000);
    }
}
