//! Utility macros for error handling.

/// Creates a [`crate::error::FerryError`] from an error kind and description,
/// with an optional dynamic detail.
///
/// ```rust,no_run
/// use rowferry::error::{ErrorKind, FerryError};
/// use rowferry::ferry_error;
///
/// let error = ferry_error!(ErrorKind::ConfigError, "Source connectivity check failed");
/// let error = ferry_error!(
///     ErrorKind::SchemaError,
///     "Table has no primary key",
///     "shop.audit_log"
/// );
/// ```
#[macro_export]
macro_rules! ferry_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::FerryError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::FerryError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Creates and returns a [`crate::error::FerryError`] from the current
/// function.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::ferry_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::ferry_error!($kind, $desc, $detail))
    };
}
