//! Directory of running registries, keyed by name.
//!
//! A registry is activated on first use and stays resident until it is
//! deactivated, goes idle, or the directory shuts down.
//!
//! Each name has a slot guarded by its own lock. Stopping an instance holds
//! the lock until the task has written its final snapshot, and activation
//! waits for any previous task of the same name to finish. At most one
//! instance of a name ever touches its snapshot slot.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actor::{RegistryActor, RegistryConfig};
use crate::handle::RegistryHandle;
use crate::storage::SnapshotStorage;

struct ActiveRegistry {
    handle: RegistryHandle,
    task: JoinHandle<()>,
}

/// `None` once the instance has been stopped through the directory.
/// `Some` with a closed mailbox means the task stopped itself and may still
/// be flushing.
type Slot = Arc<Mutex<Option<ActiveRegistry>>>;

pub struct RegistryDirectory {
    storage: Arc<dyn SnapshotStorage>,
    config: RegistryConfig,
    slots: RwLock<HashMap<String, Slot>>,
}

impl RegistryDirectory {
    pub fn new(storage: Arc<dyn SnapshotStorage>, config: RegistryConfig) -> Self {
        Self {
            storage,
            config,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Handle to registry `name`, starting it if it is not running.
    pub async fn get_or_activate(&self, name: &str) -> RegistryHandle {
        let slot = self.slot(name).await;
        let mut active = slot.lock().await;

        if let Some(current) = active.as_ref().filter(|a| a.handle.is_running()) {
            return current.handle.clone();
        }
        // A task that stopped itself may still be writing its last snapshot.
        if let Some(previous) = active.take() {
            debug!(registry = name, "waiting for previous instance to stop");
            join(name, previous.task).await;
        }

        debug!(registry = name, "activating registry");
        let (handle, task) = RegistryActor::spawn(name, self.storage.clone(), self.config.clone());
        *active = Some(ActiveRegistry {
            handle: handle.clone(),
            task,
        });
        handle
    }

    /// Names of the running registries, sorted.
    pub async fn names(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();

        let mut names = Vec::new();
        for (name, slot) in slots {
            if slot.lock().await.as_ref().is_some_and(|a| a.handle.is_running()) {
                names.push(name);
            }
        }
        names.sort();
        names
    }

    /// Flush and stop one registry. Returns false if it was not running.
    pub async fn deactivate(&self, name: &str) -> bool {
        let Some(slot) = self.slots.read().await.get(name).cloned() else {
            return false;
        };
        let mut active = slot.lock().await;
        let Some(current) = active.take() else {
            return false;
        };
        let was_running = current.handle.is_running();
        stop(name, current).await;
        was_running
    }

    /// Flush and stop every registry.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, Slot)> = self.slots.write().await.drain().collect();
        let mut count = 0;
        for (name, slot) in drained {
            if let Some(current) = slot.lock().await.take() {
                stop(&name, current).await;
                count += 1;
            }
        }
        info!(count, "all registries stopped");
    }

    /// The slot for `name`, creating it if needed. Slots of stopped
    /// registries that nobody else holds are dropped on the way.
    async fn slot(&self, name: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(name) {
            return slot.clone();
        }

        let mut slots = self.slots.write().await;
        // Clones are only taken under this lock, so a count of one means no
        // caller is between lookup and locking the slot.
        slots.retain(|key, slot| {
            key == name
                || Arc::strong_count(slot) > 1
                || slot
                    .try_lock()
                    .map_or(true, |active| active.as_ref().is_some_and(|a| !a.task.is_finished()))
        });
        slots.entry(name.to_string()).or_default().clone()
    }
}

async fn stop(name: &str, active: ActiveRegistry) {
    if let Err(e) = active.handle.shutdown().await {
        debug!(registry = name, error = %e, "registry already stopping");
    }
    join(name, active.task).await;
}

async fn join(name: &str, task: JoinHandle<()>) {
    if let Err(e) = task.await {
        warn!(registry = name, error = %e, "registry task ended abnormally");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use promvault_core::LabelSet;
    use promvault_state::{LoadedSnapshot, Snapshot, StateResult, StateStore};

    use super::*;

    fn directory(store: &StateStore) -> RegistryDirectory {
        RegistryDirectory::new(Arc::new(store.clone()), RegistryConfig::default())
    }

    /// Real store whose writes take a while to land.
    struct SlowStorage {
        inner: StateStore,
        delay: Duration,
    }

    impl SnapshotStorage for SlowStorage {
        fn load(&self, registry: &str) -> StateResult<LoadedSnapshot> {
            self.inner.load_snapshot(registry)
        }

        fn store(&self, registry: &str, revision: u64, snapshot: &Snapshot) -> StateResult<bool> {
            std::thread::sleep(self.delay);
            self.inner.put_snapshot(registry, revision, snapshot)
        }

        fn delete(&self, registry: &str, revision: u64) -> StateResult<bool> {
            self.inner.delete_snapshot(registry, revision)
        }
    }

    fn slow_directory(store: &StateStore, config: RegistryConfig) -> Arc<RegistryDirectory> {
        let storage = SlowStorage {
            inner: store.clone(),
            delay: Duration::from_millis(300),
        };
        Arc::new(RegistryDirectory::new(Arc::new(storage), config))
    }

    #[tokio::test(start_paused = true)]
    async fn same_name_shares_one_instance() {
        let store = StateStore::open_in_memory().unwrap();
        let dir = directory(&store);

        let a = dir.get_or_activate("api").await;
        let b = dir.get_or_activate("api").await;
        a.counter("c", "c").await.unwrap().inc(LabelSet::new()).await.unwrap();
        assert!(b.metrics().await.unwrap().contains("\nc 1\n"));
        assert_eq!(dir.names().await, vec!["api".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn registries_are_isolated() {
        let store = StateStore::open_in_memory().unwrap();
        let dir = directory(&store);

        let a = dir.get_or_activate("a").await;
        let b = dir.get_or_activate("b").await;
        a.gauge("g", "g").await.unwrap().inc(LabelSet::new()).await.unwrap();
        assert_eq!(b.metrics().await.unwrap(), "");
        assert_eq!(dir.names().await, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn deactivate_flushes_and_reactivation_restores() {
        let store = StateStore::open_in_memory().unwrap();
        let dir = directory(&store);

        let reg = dir.get_or_activate("api").await;
        reg.counter("c", "c").await.unwrap().add(5.0, LabelSet::new()).await.unwrap();
        assert!(dir.deactivate("api").await);
        assert!(!dir.deactivate("api").await);
        assert!(dir.names().await.is_empty());
        assert!(store.load_snapshot("api").unwrap().snapshot.is_some());

        let reg = dir.get_or_activate("api").await;
        assert!(reg.metrics().await.unwrap().contains("\nc 5\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_registry_is_restarted_on_next_use() {
        let store = StateStore::open_in_memory().unwrap();
        let dir = directory(&store);

        let reg = dir.get_or_activate("api").await;
        reg.shutdown().await.unwrap();

        let reg = dir.get_or_activate("api").await;
        assert!(reg.is_running());
        assert_eq!(reg.metrics().await.unwrap(), "");
    }

    #[tokio::test]
    async fn activation_waits_for_deactivation_to_finish_flushing() {
        let store = StateStore::open_in_memory().unwrap();
        let dir = slow_directory(&store, RegistryConfig::default());

        let reg = dir.get_or_activate("api").await;
        reg.counter("c", "c").await.unwrap().add(5.0, LabelSet::new()).await.unwrap();

        let stopping = {
            let dir = dir.clone();
            tokio::spawn(async move { dir.deactivate("api").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reg = dir.get_or_activate("api").await;
        assert!(reg.metrics().await.unwrap().contains("\nc 5\n"));
        assert!(stopping.await.unwrap());
    }

    #[tokio::test]
    async fn activation_waits_for_self_stopped_instance() {
        let store = StateStore::open_in_memory().unwrap();
        let dir = slow_directory(&store, RegistryConfig::default());

        let reg = dir.get_or_activate("api").await;
        reg.counter("c", "c").await.unwrap().add(5.0, LabelSet::new()).await.unwrap();

        let stopping = {
            let reg = reg.clone();
            tokio::spawn(async move { reg.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reg.is_running());

        let reg = dir.get_or_activate("api").await;
        assert!(reg.metrics().await.unwrap().contains("\nc 5\n"));
        stopping.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_registry_stops_and_comes_back_on_next_use() {
        let store = StateStore::open_in_memory().unwrap();
        let config = RegistryConfig {
            idle_timeout: Some(Duration::from_secs(60)),
            ..RegistryConfig::default()
        };
        let dir = RegistryDirectory::new(Arc::new(store.clone()), config);

        let reg = dir.get_or_activate("api").await;
        reg.counter("c", "c").await.unwrap().inc(LabelSet::new()).await.unwrap();
        assert_eq!(dir.names().await, vec!["api".to_string()]);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!reg.is_running());
        assert!(dir.names().await.is_empty());

        let reg = dir.get_or_activate("api").await;
        assert!(reg.metrics().await.unwrap().contains("\nc 1\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_slots_are_pruned() {
        let store = StateStore::open_in_memory().unwrap();
        let config = RegistryConfig {
            idle_timeout: Some(Duration::from_secs(1)),
            ..RegistryConfig::default()
        };
        let dir = RegistryDirectory::new(Arc::new(store.clone()), config);

        for i in 0..10 {
            dir.get_or_activate(&format!("tenant-{i}")).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;

        dir.get_or_activate("fresh").await;
        assert_eq!(dir.slots.read().await.len(), 1);
        assert_eq!(dir.names().await, vec!["fresh".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_all_persists_every_registry() {
        let store = StateStore::open_in_memory().unwrap();
        let dir = directory(&store);

        for name in ["a", "b"] {
            let reg = dir.get_or_activate(name).await;
            reg.counter("c", "c").await.unwrap().inc(LabelSet::new()).await.unwrap();
        }
        dir.shutdown_all().await;

        assert!(dir.names().await.is_empty());
        let mut stored = store.list_registries().unwrap();
        stored.sort();
        assert_eq!(stored, vec!["a".to_string(), "b".to_string()]);
    }
}
