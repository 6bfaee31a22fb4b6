//! Error types for the promvault state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors from reading or replacing a registry's snapshot slot.
///
/// A stale write or delete is not an error: the store reports it as `Ok(false)`
/// and leaves the slot as it was.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    /// The slot holds bytes that are not a snapshot document at all.
    #[error("deserialization error: {0}")]
    Deserialize(String),
}
