//! Configuration for the streaming service
//!
//! Bootstrap configuration comes from a small TOML file; command-line
//! arguments override individual fields. Everything has a built-in default
//! except the media root, which must point at a real directory.

use crate::error::{Error, Result};
use cadenza_common::{BitrateMode, Quality};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Service configuration loaded from TOML
///
/// These settings cannot change during runtime; the service must restart to
/// pick up changes.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Control channel port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Dedicated stream channel port (default: control port + 1)
    #[serde(default)]
    pub stream_port: Option<u16>,

    /// Root folder of the media library
    #[serde(default)]
    pub media_root: Option<PathBuf>,

    /// Streaming defaults
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-session streaming defaults
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    /// Master switch; subscribers get UNAVAILABLE when disabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Quality tier for new sessions
    #[serde(default)]
    pub default_quality: Quality,

    /// Bitrate mode for new sessions
    #[serde(default)]
    pub bitrate_mode: BitrateMode,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_port() -> u16 {
    5750
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            stream_port: None,
            media_root: None,
            streaming: StreamingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_quality: Quality::default(),
            bitrate_mode: BitrateMode::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&text).map_err(|e| {
            Error::Config(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    /// Effective stream channel port.
    pub fn stream_port(&self) -> u16 {
        self.stream_port.unwrap_or(self.port + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.port, 5750);
        assert_eq!(config.stream_port(), 5751);
        assert!(config.streaming.enabled);
        assert_eq!(config.streaming.default_quality, Quality::Standard);
        assert_eq!(config.streaming.bitrate_mode, BitrateMode::Vbr);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_config_overrides() {
        let config: Config = toml::from_str(
            r#"
            port = 6000
            media_root = "/srv/music"

            [streaming]
            default_quality = "hifi"
            bitrate_mode = "cbr"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.stream_port(), 6001);
        assert_eq!(config.media_root.as_deref(), Some(Path::new("/srv/music")));
        assert_eq!(config.streaming.default_quality, Quality::HiFi);
        assert_eq!(config.streaming.bitrate_mode, BitrateMode::Cbr);
        assert!(config.streaming.enabled);
    }

    #[test]
    fn explicit_stream_port_wins() {
        let config: Config = toml::from_str("stream_port = 7000").unwrap();
        assert_eq!(config.stream_port(), 7000);
    }
}
