use std::{error, fmt, result};

/// Type alias for convenience when using the Result type with our error.
pub type FerryResult<T> = result::Result<T, FerryError>;

/// Classification of ferry failures.
///
/// The kinds map directly onto the retry and reporting policy: transient
/// target-write and binlog-connection errors are retried locally by the
/// component that saw them, everything else that reaches the error handler
/// is fatal. [`ErrorKind::Cancelled`] is distinguishable because a
/// cancellation is not a failure for reporting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid configuration, connectivity or TLS material at initialize.
    ConfigError,
    /// A read against the source database failed.
    SourceReadError,
    /// The binlog stream failed beyond the reconnection budget.
    BinlogError,
    /// A write against the target database failed beyond the retry budget.
    TargetWriteError,
    /// A table or row shape is inconsistent with the cached schema.
    SchemaError,
    /// A database operation exceeded its deadline.
    Timeout,
    /// The operation observed the cancellation signal.
    Cancelled,
    /// An operation was invoked in a state that does not permit it.
    InvalidState,
    /// A background task panicked.
    WorkerPanic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ConfigError => "config error",
            ErrorKind::SourceReadError => "source read error",
            ErrorKind::BinlogError => "binlog error",
            ErrorKind::TargetWriteError => "target write error",
            ErrorKind::SchemaError => "schema error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::WorkerPanic => "worker panic",
        };
        f.write_str(name)
    }
}

/// Internal error representation with kind, description and optional source.
///
/// Boxed to keep the public error a single pointer wide on the success path.
struct ErrorInner {
    kind: ErrorKind,
    description: &'static str,
    detail: Option<String>,
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

/// The error type used throughout the ferry pipeline.
///
/// Carries a stable [`ErrorKind`] for policy decisions, a static description
/// of what was being attempted, and optionally a dynamic detail string and
/// the underlying source error.
pub struct FerryError(Box<ErrorInner>);

impl FerryError {
    pub fn new(kind: ErrorKind, description: &'static str) -> Self {
        FerryError(Box::new(ErrorInner {
            kind,
            description,
            detail: None,
            source: None,
        }))
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.0.detail = Some(detail.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        self.0.source = Some(source.into());
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }

    /// Returns true if this error represents an observed cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.0.kind == ErrorKind::Cancelled
    }
}

impl From<(ErrorKind, &'static str)> for FerryError {
    fn from((kind, description): (ErrorKind, &'static str)) -> Self {
        FerryError::new(kind, description)
    }
}

impl From<(ErrorKind, &'static str, String)> for FerryError {
    fn from((kind, description, detail): (ErrorKind, &'static str, String)) -> Self {
        FerryError::new(kind, description).with_detail(detail)
    }
}

impl fmt::Debug for FerryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FerryError")
            .field("kind", &self.0.kind)
            .field("description", &self.0.description)
            .field("detail", &self.0.detail)
            .field("source", &self.0.source)
            .finish()
    }
}

impl fmt::Display for FerryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.kind, self.0.description)?;
        if let Some(detail) = &self.0.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl error::Error for FerryError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0
            .source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_detail() {
        let error = FerryError::new(ErrorKind::SourceReadError, "Failed to scan table")
            .with_detail("shop.users");
        assert_eq!(
            error.to_string(),
            "source read error: Failed to scan table (shop.users)"
        );
    }

    #[test]
    fn cancellation_is_distinguishable() {
        let error = FerryError::new(ErrorKind::Cancelled, "Run was cancelled");
        assert!(error.is_cancelled());
        assert!(!FerryError::new(ErrorKind::Timeout, "Deadline expired").is_cancelled());
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let error = FerryError::new(ErrorKind::BinlogError, "Stream failed").with_source(io);
        assert!(std::error::Error::source(&error).is_some());
    }
}
