//! # Runtime Configuration
//!
//! Aggregates the protocol manager and telemetry configuration with the
//! runtime's own settings.

use protocol_manager::{ConfigError, ProtocolManagerConfig};
use protocol_telemetry::TelemetryConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub manager: ProtocolManagerConfig,
    pub telemetry: TelemetryConfig,
    /// Where the store is saved on shutdown and restored from at startup.
    /// `None` keeps everything in memory only.
    pub state_file: Option<PathBuf>,
    /// How long shutdown waits for queued work before giving up.
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            manager: ProtocolManagerConfig::default(),
            telemetry: TelemetryConfig::default(),
            state_file: None,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    #[error(transparent)]
    Manager(#[from] ConfigError),

    #[error("Shutdown timeout must be positive")]
    ZeroShutdownTimeout,

    #[error("State file {0} is a directory")]
    StateFileIsDirectory(PathBuf),
}

impl RuntimeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PROTOCOL_STATE_FILE`: state file path (default: none)
    /// - `PROTOCOL_SHUTDOWN_TIMEOUT_SECS` (default: 5)
    ///
    /// plus those read by [`ProtocolManagerConfig::from_env`] and
    /// [`TelemetryConfig::from_env`].
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            manager: ProtocolManagerConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
            state_file: env::var("PROTOCOL_STATE_FILE").ok().map(PathBuf::from),
            shutdown_timeout: env::var("PROTOCOL_SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
        }
    }

    pub fn validate(&self) -> Result<(), RuntimeConfigError> {
        self.manager.validate()?;
        if self.shutdown_timeout.is_zero() {
            return Err(RuntimeConfigError::ZeroShutdownTimeout);
        }
        if let Some(path) = &self.state_file {
            if path.is_dir() {
                return Err(RuntimeConfigError::StateFileIsDirectory(path.clone()));
            }
        }
        Ok(())
    }
}
