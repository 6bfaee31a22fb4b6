//! promvault-state — durable snapshot storage for promvault registries.
//!
//! Backed by [redb](https://docs.rs/redb). Each registry instance owns a
//! single slot holding its latest full snapshot, JSON-serialized into a
//! `&[u8]` value column, plus a revision counter that rejects stale writes.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across registry actors.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{LoadedSnapshot, StateStore, SNAPSHOT_KEY};
pub use types::*;
