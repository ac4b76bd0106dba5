//! Shared configuration types for rowferry runs.

mod batch;
mod connection;
mod ferry;
mod reconnection;
mod throttle;

pub use batch::BatchConfig;
pub use connection::{MySqlConnectionConfig, TlsConfig};
pub use ferry::{ConflictStrategy, FerryConfig};
pub use reconnection::ReconnectionConfig;
pub use throttle::ThrottlerConfig;

use thiserror::Error;

/// Validation failure for a configuration value.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value outside its accepted range.
    #[error("invalid value for field '{field}': {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}

impl ValidationError {
    pub fn invalid(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::InvalidFieldValue {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}
