//! Logging settings, read once at startup from the process environment.

use std::env;

const DEFAULT_SERVICE_NAME: &str = "protocol-engine";

/// Configuration for structured logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error, or a full directive)
    pub log_level: String,

    /// Whether to write logs to stdout at all
    pub console_output: bool,

    /// Whether to use JSON formatted logs
    pub json_logs: bool,
}

const DEFAULT_LOG_LEVEL: &str = "info";

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            log_level: DEFAULT_LOG_LEVEL.to_owned(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Read `PROTOCOL_SERVICE_NAME`, `PROTOCOL_LOG_LEVEL` (falling back to
    /// `RUST_LOG`), `PROTOCOL_CONSOLE_OUTPUT` and `PROTOCOL_JSON_LOGS`.
    ///
    /// JSON output is the default when running under an orchestrator.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let orchestrated = ["KUBERNETES_SERVICE_HOST", "DOCKER_CONTAINER"]
            .iter()
            .any(|key| lookup(*key).is_some());
        let flag = |key: &str, default: bool| {
            lookup(key).map_or(default, |value| parse_flag(&value, default))
        };

        Self {
            service_name: lookup("PROTOCOL_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_owned()),
            log_level: lookup("PROTOCOL_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned()),
            console_output: flag("PROTOCOL_CONSOLE_OUTPUT", true),
            json_logs: flag("PROTOCOL_JSON_LOGS", orchestrated),
        }
    }

    /// Verbose configuration for tests and local debugging.
    #[must_use]
    pub fn verbose() -> Self {
        Self {
            log_level: "debug".to_owned(),
            ..Self::default()
        }
    }
}

/// `true`/`1` and `false`/`0`, case-insensitive; anything else is `default`.
fn parse_flag(value: &str, default: bool) -> bool {
    match value.to_lowercase().as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => default,
    }
}
