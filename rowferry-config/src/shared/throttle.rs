use std::time::Duration;

use serde::Deserialize;

use crate::shared::ValidationError;

/// Replication-lag thresholds and polling cadence for the throttler.
///
/// The throttler engages when observed lag rises to `lag_high_water_ms` and
/// disengages only once it falls back to `lag_low_water_ms`, giving the
/// source room to recover before producers resume.
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottlerConfig {
    /// Interval between replication-lag probes, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Lag at or above which producers are throttled, in milliseconds.
    #[serde(default = "default_lag_high_water_ms")]
    pub lag_high_water_ms: u64,
    /// Lag at or below which producers resume, in milliseconds.
    #[serde(default = "default_lag_low_water_ms")]
    pub lag_low_water_ms: u64,
}

impl ThrottlerConfig {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
    pub const DEFAULT_LAG_HIGH_WATER_MS: u64 = 3000;
    pub const DEFAULT_LAG_LOW_WATER_MS: u64 = 1000;

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lag_high_water(&self) -> Duration {
        Duration::from_millis(self.lag_high_water_ms)
    }

    pub fn lag_low_water(&self) -> Duration {
        Duration::from_millis(self.lag_low_water_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval_ms == 0 {
            return Err(ValidationError::invalid(
                "throttler.poll_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.lag_low_water_ms > self.lag_high_water_ms {
            return Err(ValidationError::invalid(
                "throttler.lag_low_water_ms",
                "must not exceed throttler.lag_high_water_ms",
            ));
        }

        Ok(())
    }
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            lag_high_water_ms: default_lag_high_water_ms(),
            lag_low_water_ms: default_lag_low_water_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    ThrottlerConfig::DEFAULT_POLL_INTERVAL_MS
}

fn default_lag_high_water_ms() -> u64 {
    ThrottlerConfig::DEFAULT_LAG_HIGH_WATER_MS
}

fn default_lag_low_water_ms() -> u64 {
    ThrottlerConfig::DEFAULT_LAG_LOW_WATER_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_watermarks() {
        let config = ThrottlerConfig {
            lag_high_water_ms: 100,
            lag_low_water_ms: 200,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_watermarks_are_ordered() {
        let config = ThrottlerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.lag_low_water() <= config.lag_high_water());
    }
}
