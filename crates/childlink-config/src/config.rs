//! Launcher configuration
//!
//! Precedence is explicit path (`CHILDLINK_CONFIG`) > discovered
//! `.childlink/config.toml` > built-in defaults. The file uses a single
//! `[forwarding]` table:
//!
//! ```toml
//! [forwarding]
//! chunk_size = 4096
//! poll_interval_ms = 100
//! join_timeout_ms = 2000
//! ```

use anyhow::{Context, Result};
use childlink_utils::error::{ErrorCategory, UserFriendlyError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "CHILDLINK_CONFIG";

/// Directory searched for `config.toml` during discovery
pub const CONFIG_DIR_NAME: &str = ".childlink";

/// Size of a single read on the child's output pipe
pub const DEFAULT_FORWARD_CHUNK_SIZE: usize = 4096;

/// How long a forwarder waits for data before re-checking cancellation
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// How long teardown waits for each forwarder before detaching it
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 2000;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidValue { key, reason } => {
                format!("Configuration value '{key}' is invalid: {reason}")
            }
        }
    }

    fn context(&self) -> Option<String> {
        Some(
            "Forwarding settings control how childlink relays the child's standard I/O."
                .to_string(),
        )
    }

    fn suggestions(&self) -> Vec<String> {
        vec![
            format!("Check the [forwarding] table in {CONFIG_DIR_NAME}/config.toml"),
            "Remove the offending key to fall back to the built-in default".to_string(),
        ]
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

/// Runtime settings for a launcher and its forwarders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    /// Bytes requested per read on the output pipe.
    pub forward_chunk_size: usize,
    /// Wait granularity between cancellation checks.
    pub poll_interval: Duration,
    /// Upper bound on how long teardown waits for each forwarder.
    pub join_timeout: Duration,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            forward_chunk_size: DEFAULT_FORWARD_CHUNK_SIZE,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            join_timeout: Duration::from_millis(DEFAULT_JOIN_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    forwarding: Option<ForwardingSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ForwardingSection {
    chunk_size: Option<usize>,
    poll_interval_ms: Option<u64>,
    join_timeout_ms: Option<u64>,
}

impl LauncherConfig {
    /// Start building a configuration from the defaults
    #[must_use]
    pub fn builder() -> LauncherConfigBuilder {
        LauncherConfigBuilder::new()
    }

    /// Discover configuration starting from the current directory
    pub fn discover() -> Result<Self> {
        let start_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&start_dir)
    }

    /// Discover configuration starting from a specific directory
    ///
    /// `CHILDLINK_CONFIG` takes precedence over the upward search.
    pub fn discover_from(start_dir: &Path) -> Result<Self> {
        let config_path = match std::env::var_os(CONFIG_ENV_VAR) {
            Some(explicit) if !explicit.is_empty() => Some(PathBuf::from(explicit)),
            _ => Self::discover_config_file_from(start_dir),
        };

        match config_path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading launcher configuration");
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Search upward for `.childlink/config.toml`
    ///
    /// Stops at the filesystem root or at a repository root marker.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
        let mut current_dir = Some(start_dir);

        while let Some(dir) = current_dir {
            let config_path = dir.join(CONFIG_DIR_NAME).join("config.toml");
            if config_path.is_file() {
                return Some(config_path);
            }

            if dir.join(".git").exists() || dir.join(".hg").exists() || dir.join(".svn").exists()
            {
                break;
            }

            current_dir = dir.parent();
        }

        None
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;

        let mut builder = LauncherConfigBuilder::new();
        if let Some(forwarding) = file.forwarding {
            if let Some(chunk_size) = forwarding.chunk_size {
                builder = builder.forward_chunk_size(chunk_size);
            }
            if let Some(ms) = forwarding.poll_interval_ms {
                builder = builder.poll_interval(Duration::from_millis(ms));
            }
            if let Some(ms) = forwarding.join_timeout_ms {
                builder = builder.join_timeout(Duration::from_millis(ms));
            }
        }

        Ok(builder.build()?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forward_chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "forwarding.chunk_size".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "forwarding.poll_interval_ms".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        // poll(2) takes an i32 millisecond timeout
        if self.poll_interval.as_millis() > i32::MAX as u128 {
            return Err(ConfigError::InvalidValue {
                key: "forwarding.poll_interval_ms".to_string(),
                reason: format!("must not exceed {} ms", i32::MAX),
            });
        }
        if self.join_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "forwarding.join_timeout_ms".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`LauncherConfig`]
#[derive(Debug, Clone, Default)]
pub struct LauncherConfigBuilder {
    config: LauncherConfig,
}

impl LauncherConfigBuilder {
    /// Create a builder seeded with the defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read size used by the output forwarder
    #[must_use]
    pub fn forward_chunk_size(mut self, bytes: usize) -> Self {
        self.config.forward_chunk_size = bytes;
        self
    }

    /// Set the interval between cancellation checks
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set how long teardown waits for each forwarder
    #[must_use]
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.config.join_timeout = timeout;
        self
    }

    /// Validate and produce the configuration
    pub fn build(self) -> Result<LauncherConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
