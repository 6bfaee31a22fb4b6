//! Errors surfaced to registry callers.

use promvault_metrics::MetricsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The operation violated a precondition and was not applied.
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    /// The registry task has stopped and no longer accepts operations.
    #[error("registry `{0}` is not running")]
    Unavailable(String),
}
