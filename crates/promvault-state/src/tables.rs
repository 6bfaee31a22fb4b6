//! redb table definitions for the promvault state store.
//!
//! Slot keys follow the pattern `{registry}/{SNAPSHOT_KEY}`.

use redb::TableDefinition;

/// Serialized snapshots, one per registry slot.
pub const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

/// Highest revision written or cleared for each slot.
pub const REVISIONS: TableDefinition<&str, u64> = TableDefinition::new("snapshot_revisions");
