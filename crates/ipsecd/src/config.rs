//! Configuration loading and validation for the IPsec daemon

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl From<ConfigError> for common::Error {
    fn from(err: ConfigError) -> Self {
        common::Error::config(err)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub vici: ViciSettings,

    #[serde(default)]
    pub xfrm: XfrmSettings,

    #[serde(default)]
    pub state: StateSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.vici.validate()?;
        self.xfrm.validate()?;
        self.state.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// IKE daemon control socket settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ViciSettings {
    #[validate(length(min = 1), custom = "validate_socket_path")]
    pub socket_path: String,

    /// Forwarded with `initiate`; the daemon enforces it
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_command_timeout")]
    pub initiate_timeout: Duration,

    /// Forwarded with `terminate`
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_command_timeout")]
    pub terminate_timeout: Duration,
}

/// Kernel netlink settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct XfrmSettings {
    #[validate(range(min = 4096, max = 16777216))]
    pub recv_buffer_size: usize,
}

/// Desired-state source
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StateSettings {
    #[validate(length(min = 1))]
    pub path: String,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_resync_interval")]
    pub resync_interval: Duration,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct LoggingSettings {
    pub level: Option<String>,
    #[validate(custom = "validate_log_format")]
    pub format: Option<String>,
}

impl LoggingSettings {
    pub fn is_json(&self) -> bool {
        self.format.as_deref() == Some("json")
    }
}

// Default implementations

impl Default for ViciSettings {
    fn default() -> Self {
        Self {
            socket_path: vici::DEFAULT_SOCKET_PATH.to_string(),
            initiate_timeout: Duration::from_secs(10),
            terminate_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for XfrmSettings {
    fn default() -> Self {
        Self {
            recv_buffer_size: xfrm::DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            path: "/etc/ipsecd/state.yaml".to_string(),
            resync_interval: Duration::from_secs(30),
        }
    }
}

// Custom validators

fn validate_socket_path(path: &str) -> Result<(), ValidationError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("socket_path_empty"));
    }

    // Must be absolute path or relative (starting with ./)
    if !trimmed.starts_with('/') && !trimmed.starts_with("./") {
        return Err(ValidationError::new("socket_path_invalid_format"));
    }

    Ok(())
}

fn validate_command_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    if timeout.is_zero() || *timeout > Duration::from_secs(300) {
        return Err(ValidationError::new("command_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_resync_interval(interval: &Duration) -> Result<(), ValidationError> {
    if *interval < Duration::from_secs(1) || *interval > Duration::from_secs(3600) {
        return Err(ValidationError::new("resync_interval_out_of_range"));
    }
    Ok(())
}

fn validate_log_format(format: &str) -> Result<(), ValidationError> {
    match format {
        "text" | "json" => Ok(()),
        _ => Err(ValidationError::new("log_format_unknown")),
    }
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/ipsecd/ipsecd.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./ipsecd.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/ipsecd/ipsecd.yaml"))
    }
}
