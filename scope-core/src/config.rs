//! Environment-driven configuration, abstracted away from its source (CLI
//! flags, env vars, a TOML file) behind a plain struct.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

fn default_pipeline_id() -> String {
    "passthrough".to_string()
}

fn default_max_buffer_size() -> usize {
    30
}

fn default_bitrate_min_kbps() -> u32 {
    5_000
}

fn default_bitrate_max_kbps() -> u32 {
    10_000
}

fn default_bitrate_kbps() -> u32 {
    7_000
}

/// Core configuration, independent of how it was sourced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pipeline id loaded at startup when pre-warming.
    #[serde(default = "default_pipeline_id")]
    pub pipeline_id: String,

    /// ICE server URLs. Empty means "fall back to public STUN" (the
    /// original's `create_rtc_config` default), per SUPPLEMENTED FEATURES.
    #[serde(default)]
    pub ice_servers: Vec<String>,

    /// Emit DEBUG/TRACE level logs.
    #[serde(default)]
    pub verbose_logging: bool,

    /// Frame buffer capacity.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,

    /// Desired bitrate envelope; owned by the WebRTC collaborator's codec
    /// negotiation, recorded here only as configuration.
    #[serde(default = "default_bitrate_min_kbps")]
    pub bitrate_min_kbps: u32,
    #[serde(default = "default_bitrate_max_kbps")]
    pub bitrate_max_kbps: u32,
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_default_kbps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline_id: default_pipeline_id(),
            ice_servers: Vec::new(),
            verbose_logging: false,
            max_buffer_size: default_max_buffer_size(),
            bitrate_min_kbps: default_bitrate_min_kbps(),
            bitrate_max_kbps: default_bitrate_max_kbps(),
            bitrate_default_kbps: default_bitrate_kbps(),
        }
    }
}

/// Public Google STUN server, used when no ICE server is configured.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

impl Config {
    /// Effective ICE server list: configured servers, or the default STUN
    /// server when none were configured.
    pub fn effective_ice_servers(&self) -> Vec<String> {
        if self.ice_servers.is_empty() {
            vec![DEFAULT_STUN_SERVER.to_string()]
        } else {
            self.ice_servers.clone()
        }
    }

    /// `$XDG_CONFIG_HOME/scope/config.toml` (or its platform equivalent).
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("scope").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home).join(".config").join("scope").join("config.toml")
        } else {
            PathBuf::from("/etc/scope/config.toml")
        }
    }

    /// Load from a specific TOML file; falls back to defaults if the file does not
    /// exist (teacher's `ConfigFile::load_from`).
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: Self = toml::from_str(&content).map_err(ConfigError::Parse)?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load from [`Config::default_path`], logging and falling back to
    /// defaults on any error rather than failing startup.
    pub fn load_or_default() -> Self {
        match Self::load_from(&Self::default_path()) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "failed to load config file, using defaults");
                Self::default()
            }
        }
    }
}

/// Errors loading [`Config`] from a TOML file on disk.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[source] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_passthrough_pipeline() {
        let config = Config::default();
        assert_eq!(config.pipeline_id, "passthrough");
        assert_eq!(config.max_buffer_size, 30);
    }

    #[test]
    fn falls_back_to_stun_when_no_ice_servers_configured() {
        let config = Config::default();
        assert_eq!(config.effective_ice_servers(), vec![DEFAULT_STUN_SERVER]);
    }

    #[test]
    fn configured_ice_servers_take_precedence() {
        let mut config = Config::default();
        config.ice_servers = vec!["turn:example.com:3478".to_string()];
        assert_eq!(config.effective_ice_servers(), vec!["turn:example.com:3478"]);
    }

    #[test]
    fn load_from_missing_path_falls_back_to_defaults() {
        let config = Config::load_from(std::path::Path::new("/nonexistent/scope/config.toml")).unwrap();
        assert_eq!(config.pipeline_id, "passthrough");
    }

    #[test]
    fn load_from_parses_partial_toml_with_defaults() {
        let dir = std::env::temp_dir().join(format!("scope-config-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "pipeline_id = \"longlive\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.pipeline_id, "longlive");
        assert_eq!(config.max_buffer_size, 30);

        std::fs::remove_file(&path).ok();
    }
}
