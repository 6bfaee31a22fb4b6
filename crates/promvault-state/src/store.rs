//! StateStore — redb-backed snapshot slots for promvault registries.
//!
//! Every registry instance owns exactly one slot. A write replaces the whole
//! snapshot inside a single redb transaction, so a reader sees either the
//! previous image or the new one, never a mix. Writes and deletes carry a
//! revision; a write whose revision is not newer than the slot's recorded
//! revision is discarded, which keeps a slow write from landing on top of a
//! newer one or resurrecting a cleared slot.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::Snapshot;

/// Fixed logical key of the snapshot slot inside a registry's namespace.
pub const SNAPSHOT_KEY: &str = "registry_state";

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// What a registry finds in its slot on activation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedSnapshot {
    /// Highest revision ever written or cleared for the slot (0 if never).
    pub revision: u64,
    /// The stored image, if the slot holds one.
    pub snapshot: Option<Snapshot>,
    /// Records dropped because they could not be decoded.
    pub dropped_records: usize,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn slot_key(registry: &str) -> String {
        format!("{registry}/{SNAPSHOT_KEY}")
    }

    /// Read a registry's slot.
    ///
    /// A document that is not a snapshot at all is a `Deserialize` error;
    /// individually malformed records are dropped and counted.
    pub fn load_snapshot(&self, registry: &str) -> StateResult<LoadedSnapshot> {
        let key = Self::slot_key(registry);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;

        let revision = {
            let table = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0)
        };

        let table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        let Some(guard) = table.get(key.as_str()).map_err(map_err!(Read))? else {
            return Ok(LoadedSnapshot {
                revision,
                snapshot: None,
                dropped_records: 0,
            });
        };
        let (snapshot, dropped_records) =
            Snapshot::decode_lenient(guard.value()).map_err(map_err!(Deserialize))?;
        debug!(%registry, records = snapshot.records.len(), dropped_records, revision, "snapshot loaded");
        Ok(LoadedSnapshot {
            revision,
            snapshot: Some(snapshot),
            dropped_records,
        })
    }

    /// Replace a registry's snapshot. Returns `false` if the write was
    /// discarded because the slot already holds revision `revision` or newer.
    pub fn put_snapshot(
        &self,
        registry: &str,
        revision: u64,
        snapshot: &Snapshot,
    ) -> StateResult<bool> {
        let key = Self::slot_key(registry);
        let value = snapshot.encode().map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut revisions = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            let current = revisions
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            if revision <= current {
                warn!(%registry, revision, current, "discarding stale snapshot write");
                return Ok(false);
            }
            revisions
                .insert(key.as_str(), revision)
                .map_err(map_err!(Write))?;

            let mut table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%registry, revision, bytes = value.len(), "snapshot stored");
        Ok(true)
    }

    /// Delete a registry's snapshot, recording `revision` so that older
    /// in-flight writes cannot bring it back. Returns `false`, leaving the
    /// slot untouched, if the slot already holds revision `revision` or newer.
    pub fn delete_snapshot(&self, registry: &str, revision: u64) -> StateResult<bool> {
        let key = Self::slot_key(registry);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut revisions = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            let current = revisions
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            if revision <= current {
                warn!(%registry, revision, current, "discarding stale snapshot delete");
                return Ok(false);
            }
            revisions
                .insert(key.as_str(), revision)
                .map_err(map_err!(Write))?;

            let mut table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%registry, revision, existed, "snapshot deleted");
        Ok(true)
    }

    /// Names of all registries that currently hold a snapshot.
    pub fn list_registries(&self) -> StateResult<Vec<String>> {
        let suffix = format!("/{SNAPSHOT_KEY}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if let Some(name) = key.value().strip_suffix(&suffix) {
                results.push(name.to_string());
            }
        }
        Ok(results)
    }
}
