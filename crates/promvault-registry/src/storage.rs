//! Durable snapshot slot used by registry actors.

use std::time::Duration;

use promvault_state::{LoadedSnapshot, Snapshot, StateError, StateResult, StateStore};
use thiserror::Error;
use tokio::task::JoinError;

/// Blocking access to one slot per registry name.
///
/// Actors call these from `spawn_blocking`, never on the async executor.
pub trait SnapshotStorage: Send + Sync + 'static {
    fn load(&self, registry: &str) -> StateResult<LoadedSnapshot>;

    /// Replace the slot. `Ok(false)` means a newer revision already landed.
    fn store(&self, registry: &str, revision: u64, snapshot: &Snapshot) -> StateResult<bool>;

    /// Empty the slot. `Ok(false)` means a newer revision already landed and
    /// the slot was left alone.
    fn delete(&self, registry: &str, revision: u64) -> StateResult<bool>;
}

impl SnapshotStorage for StateStore {
    fn load(&self, registry: &str) -> StateResult<LoadedSnapshot> {
        self.load_snapshot(registry)
    }

    fn store(&self, registry: &str, revision: u64, snapshot: &Snapshot) -> StateResult<bool> {
        self.put_snapshot(registry, revision, snapshot)
    }

    fn delete(&self, registry: &str, revision: u64) -> StateResult<bool> {
        self.delete_snapshot(registry, revision)
    }
}

/// Why a background storage call did not produce a result.
#[derive(Debug, Error)]
pub enum IoFailure {
    #[error(transparent)]
    Storage(#[from] StateError),

    #[error("storage task failed: {0}")]
    Task(#[from] JoinError),

    #[error("storage call exceeded {0:?}")]
    TimedOut(Duration),
}

/// Run a blocking storage call off the executor, giving up after `limit`.
///
/// Giving up does not cancel the call: redb commits are atomic, so it either
/// lands whole or not at all, and revisions keep a late landing from
/// overwriting newer state.
pub(crate) async fn run_blocking<T, F>(limit: Duration, f: F) -> Result<T, IoFailure>
where
    T: Send + 'static,
    F: FnOnce() -> StateResult<T> + Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(joined) => Ok(joined??),
        Err(_) => Err(IoFailure::TimedOut(limit)),
    }
}
