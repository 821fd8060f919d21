//! Protocol manager configuration from defaults or environment variables.

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 3600);

/// What to do when a step's unit of work cannot be saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFailurePolicy {
    /// Re-run the step after `delay`, at most `max_attempts` times in total,
    /// then drop the message.
    RetryAfter { delay: Duration, max_attempts: u32 },
    /// Drop the message right away.
    Drop,
}

impl Default for SaveFailurePolicy {
    fn default() -> Self {
        Self::RetryAfter {
            delay: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

/// Protocol manager configuration.
#[derive(Debug, Clone)]
pub struct ProtocolManagerConfig {
    /// Steps of different instances that may run at the same time.
    pub max_concurrent_steps: usize,
    pub save_failure_policy: SaveFailurePolicy,
    /// Received messages with no instance older than this are swept at startup.
    pub obsolete_message_age: Duration,
    /// Kept-for-later messages older than this are refused or purged.
    pub kept_for_later_max_age: Duration,
    pub event_bus_capacity: usize,
}

impl Default for ProtocolManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: 1,
            save_failure_policy: SaveFailurePolicy::default(),
            obsolete_message_age: 15 * DAY,
            kept_for_later_max_age: 15 * DAY,
            event_bus_capacity: shared_bus::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ProtocolManagerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PROTOCOL_MAX_CONCURRENT_STEPS` (default: 1)
    /// - `PROTOCOL_SAVE_RETRY_DELAY_MS` (default: 1000)
    /// - `PROTOCOL_SAVE_RETRY_ATTEMPTS`: 0 drops immediately (default: 3)
    /// - `PROTOCOL_OBSOLETE_MESSAGE_AGE_SECS` (default: 15 days)
    /// - `PROTOCOL_KEPT_FOR_LATER_MAX_AGE_SECS` (default: 15 days)
    /// - `PROTOCOL_EVENT_BUS_CAPACITY` (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let save_failure_policy = match env_parse::<u32>("PROTOCOL_SAVE_RETRY_ATTEMPTS") {
            Some(0) => SaveFailurePolicy::Drop,
            attempts => SaveFailurePolicy::RetryAfter {
                delay: Duration::from_millis(
                    env_parse("PROTOCOL_SAVE_RETRY_DELAY_MS").unwrap_or(1000),
                ),
                max_attempts: attempts.unwrap_or(3),
            },
        };

        Self {
            max_concurrent_steps: env_parse("PROTOCOL_MAX_CONCURRENT_STEPS")
                .unwrap_or(defaults.max_concurrent_steps),
            save_failure_policy,
            obsolete_message_age: env_parse("PROTOCOL_OBSOLETE_MESSAGE_AGE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.obsolete_message_age),
            kept_for_later_max_age: env_parse("PROTOCOL_KEPT_FOR_LATER_MAX_AGE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.kept_for_later_max_age),
            event_bus_capacity: env_parse("PROTOCOL_EVENT_BUS_CAPACITY")
                .unwrap_or(defaults.event_bus_capacity),
        }
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_steps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_steps",
                reason: "must be at least 1".into(),
            });
        }
        if self.event_bus_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_bus_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if let SaveFailurePolicy::RetryAfter { max_attempts: 0, .. } = self.save_failure_policy {
            return Err(ConfigError::InvalidValue {
                field: "save_failure_policy",
                reason: "retry policy needs at least one attempt, use Drop instead".into(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
