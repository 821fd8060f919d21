//! # Protocol Telemetry
//!
//! Structured logging for the protocol engine.
//!
//! Every component logs through `tracing` with `flow_id`, owned identity and
//! instance uid fields. This crate installs the global subscriber: an
//! `EnvFilter` plus a pretty (development) or JSON (containers) fmt layer.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use protocol_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_logging(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PROTOCOL_SERVICE_NAME` | `protocol-engine` | Service name in logs |
//! | `PROTOCOL_LOG_LEVEL` or `RUST_LOG` | `info` | Log level filter |
//! | `PROTOCOL_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `PROTOCOL_JSON_LOGS` | `false` (`true` in containers) | JSON formatted logs |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{build_filter, init_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed to install the global subscriber: {0}")]
    SubscriberInit(String),
}

/// Span carrying the flow of one unit of work.
///
/// ```rust,ignore
/// let _span = flow_span!("process_message", flow_id = %flow_id).entered();
/// ```
#[macro_export]
macro_rules! flow_span {
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}
