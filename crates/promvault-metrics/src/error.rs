//! Errors raised synchronously by metric operations.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricsError {
    /// A metric definition is unusable: bad bucket boundaries, or a name
    /// already registered as a different kind.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation's arguments violate a precondition (negative counter
    /// increment, non-finite value, operation not supported by the kind).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}
