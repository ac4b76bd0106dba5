use serde::Deserialize;

use crate::shared::ValidationError;

/// Batch sizing for the row copy and the write path.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of rows fetched per primary-key range scan and handed
    /// to the listener chain as one batch.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
}

impl BatchConfig {
    /// Default maximum batch size for range scans.
    pub const DEFAULT_MAX_SIZE: usize = 500;

    /// Ensures max_size is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::invalid(
                "batch.max_size",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
        }
    }
}

fn default_batch_max_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_batch_size() {
        let config = BatchConfig { max_size: 0 };
        assert!(config.validate().is_err());
    }
}
