use std::time::Duration;

use serde::Deserialize;

use crate::shared::ValidationError;

/// Automatic reconnection behavior for the binlog stream.
///
/// Controls how the streamer reacts to a dropped replication connection
/// before giving up and surfacing a fatal error.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectionConfig {
    /// Whether automatic reconnection is enabled.
    ///
    /// When disabled, a connection error fails the run immediately.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Delay before the first reconnection attempt, in milliseconds.
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    /// Upper bound on the delay between attempts, in milliseconds.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt. Must be
    /// at least 1.0.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Number of consecutive failed attempts after which the run fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl ReconnectionConfig {
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.backoff_multiplier < 1.0 {
            return Err(ValidationError::invalid(
                "reconnection.backoff_multiplier",
                "must be at least 1.0",
            ));
        }

        if self.enabled && self.max_attempts == 0 {
            return Err(ValidationError::invalid(
                "reconnection.max_attempts",
                "must be greater than 0 when reconnection is enabled",
            ));
        }

        Ok(())
    }
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_shrinking_backoff() {
        let config = ReconnectionConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_attempts_when_enabled() {
        let config = ReconnectionConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
