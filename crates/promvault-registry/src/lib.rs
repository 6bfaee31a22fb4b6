//! promvault-registry — single-writer registry instances.
//!
//! Each named registry runs as one tokio task that owns its `MetricStore`.
//! Callers talk to it through a cloneable [`RegistryHandle`]; every
//! operation is a message, so operations on one registry never interleave
//! and the store needs no locks.
//!
//! # Architecture
//!
//! ```text
//! RegistryDirectory (name → running registry)
//!   └── RegistryActor (one task per name)
//!         ├── activation: load snapshot → restore()
//!         ├── Counter / Gauge / Histogram handles → apply op, arm FlushScheduler
//!         ├── metrics() → encode()
//!         ├── clear() → cancel pending flush, delete snapshot
//!         └── FlushScheduler deadline → background write of dump()
//! ```
//!
//! # Durability
//!
//! Writes are debounced: each mutation pushes the flush deadline out by the
//! quiescence window, and a single snapshot write happens once the registry
//! has been quiet that long. A failed or timed-out write is logged and not
//! retried; the next mutation re-arms the timer. Mutations made after the
//! last successful write are lost if the process dies.

pub mod actor;
pub mod directory;
pub mod error;
pub mod handle;
pub mod scheduler;
pub mod storage;

pub use actor::{RegistryActor, RegistryConfig};
pub use directory::RegistryDirectory;
pub use error::RegistryError;
pub use handle::{Counter, Gauge, Histogram, RegistryHandle};
pub use scheduler::{FlushScheduler, FlushState};
pub use storage::SnapshotStorage;
