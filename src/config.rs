//! Process-wide runtime configuration, layered compiled-defaults -> config file -> env.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const ENV_PREFIX: &str = "OVERLAY_ENGINE_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{field} must be {constraint}, got {value}")]
    OutOfRange {
        field: &'static str,
        constraint: &'static str,
        value: i64,
    },
}

/// Values a deployment may want to override; everything else is a compiled
/// constant. Mirrors the fields called out in the data model and external
/// interfaces sections: shared-region size, fixup capacity, reserved overlay
/// layer budget, wait timeouts, and log configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub shared_region_bytes: usize,
    pub fixup_table_capacity: usize,
    pub reserved_overlay_layers: usize,
    pub runtime_max_layers: usize,
    pub ipc_poll_period_ms: u64,
    pub wait_frame_timeout_ms: u64,
    pub event_queue_capacity: usize,
    pub negotiation_region_name: String,
    pub handshake_timeout_ms: u64,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub sentry_dsn: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            shared_region_bytes: 1024 * 1024,
            fixup_table_capacity: 128,
            reserved_overlay_layers: 2,
            runtime_max_layers: 16,
            ipc_poll_period_ms: 500,
            wait_frame_timeout_ms: 32,
            event_queue_capacity: 16,
            negotiation_region_name: "overlay-engine-negotiation".to_string(),
            handshake_timeout_ms: 5000,
            log_level: "info".to_string(),
            log_file: None,
            sentry_dsn: None,
        }
    }
}

impl EngineConfig {
    /// Loads defaults, merges a config file if present, then applies
    /// environment variable overrides. Fails fast on an invalid file or an
    /// out-of-range value rather than silently falling back to defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = EngineConfig::default();

        if let Some(path) = config_path {
            if path.exists() {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
                    path: path.to_path_buf(),
                    source,
                })?;
                config = toml::from_str(&raw).map_err(|source| ConfigError::ParseFailed {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}SHARED_REGION_BYTES")) {
            if let Ok(v) = v.parse() {
                self.shared_region_bytes = v;
            }
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}RESERVED_OVERLAY_LAYERS")) {
            if let Ok(v) = v.parse() {
                self.reserved_overlay_layers = v;
            }
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}LOG_LEVEL")) {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}LOG_FILE")) {
            self.log_file = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}SENTRY_DSN")) {
            self.sentry_dsn = Some(v);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reserved_overlay_layers >= self.runtime_max_layers {
            return Err(ConfigError::OutOfRange {
                field: "reserved_overlay_layers",
                constraint: "less than runtime_max_layers",
                value: self.reserved_overlay_layers as i64,
            });
        }
        if self.fixup_table_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                field: "fixup_table_capacity",
                constraint: "greater than zero",
                value: 0,
            });
        }
        Ok(())
    }

    pub fn wait_frame_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_frame_timeout_ms)
    }

    pub fn ipc_poll_period(&self) -> Duration {
        Duration::from_millis(self.ipc_poll_period_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn layer_budget(&self) -> usize {
        self.runtime_max_layers - self.reserved_overlay_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn reserved_layers_must_be_under_max() {
        let mut config = EngineConfig::default();
        config.reserved_overlay_layers = config.runtime_max_layers;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_wins_over_default() {
        std::env::set_var(format!("{ENV_PREFIX}RESERVED_OVERLAY_LAYERS"), "3");
        let config = EngineConfig::load(None).unwrap();
        assert_eq!(config.reserved_overlay_layers, 3);
        std::env::remove_var(format!("{ENV_PREFIX}RESERVED_OVERLAY_LAYERS"));
    }
}
