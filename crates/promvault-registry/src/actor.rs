//! The per-registry task.
//!
//! A [`RegistryActor`] owns one [`MetricStore`] and drains a mailbox of
//! [`Command`]s one at a time. It restores its snapshot before touching
//! the mailbox, so no operation ever observes a half-restored registry.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use promvault_core::config::{DEFAULT_IDLE_TIMEOUT, DEFAULT_QUIESCENCE_WINDOW, DEFAULT_WRITE_TIMEOUT};
use promvault_core::{ConfigError, LabelSet, PromvaultConfig};
use promvault_metrics::{MetricDescriptor, MetricStore, MetricsError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::handle::RegistryHandle;
use crate::scheduler::FlushScheduler;
use crate::storage::{IoFailure, SnapshotStorage, run_blocking};

const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Tuning for one registry instance.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Quiet period after the last mutation before a snapshot is written.
    pub quiescence_window: Duration,
    /// Upper bound on a single load, write, or delete.
    pub write_timeout: Duration,
    /// Keep at most this many raw samples per histogram series.
    pub max_samples_per_series: Option<usize>,
    /// Stop the task (after flushing) once no command has arrived for this
    /// long. `None` keeps it resident until shut down.
    pub idle_timeout: Option<Duration>,
    pub mailbox_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            quiescence_window: DEFAULT_QUIESCENCE_WINDOW,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_samples_per_series: None,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl RegistryConfig {
    pub fn from_config(config: &PromvaultConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            quiescence_window: config.quiescence_window()?,
            write_timeout: config.write_timeout()?,
            max_samples_per_series: config.max_samples_per_series(),
            idle_timeout: config.idle_timeout()?,
            ..Self::default()
        })
    }
}

/// One metric operation, as sent by a handle.
#[derive(Debug, Clone)]
pub(crate) enum Operation {
    Register(MetricDescriptor),
    Increment {
        desc: MetricDescriptor,
        labels: LabelSet,
        amount: f64,
    },
    Decrement {
        desc: MetricDescriptor,
        labels: LabelSet,
        amount: f64,
    },
    Observe {
        desc: MetricDescriptor,
        labels: LabelSet,
        value: f64,
    },
    Reset {
        desc: MetricDescriptor,
        labels: LabelSet,
    },
    ResetAll {
        desc: MetricDescriptor,
    },
}

impl Operation {
    /// Whether a successful application changes what a snapshot would hold.
    /// Creating a metric alone does not arm the flush timer.
    fn mutates(&self) -> bool {
        !matches!(self, Operation::Register(_))
    }

    fn apply(&self, store: &mut MetricStore) -> Result<(), MetricsError> {
        match self {
            Operation::Register(desc) => store.get_or_create(desc).map(|_| ()),
            Operation::Increment {
                desc,
                labels,
                amount,
            } => store.increment(desc, labels, *amount),
            Operation::Decrement {
                desc,
                labels,
                amount,
            } => store.decrement(desc, labels, *amount),
            Operation::Observe {
                desc,
                labels,
                value,
            } => store.observe(desc, labels, *value),
            Operation::Reset { desc, labels } => store.reset_series(desc, labels),
            Operation::ResetAll { desc } => store.reset_all(desc),
        }
    }
}

pub(crate) enum Command {
    Apply {
        op: Operation,
        reply: oneshot::Sender<Result<(), MetricsError>>,
    },
    Metrics {
        reply: oneshot::Sender<String>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct InFlight {
    revision: u64,
    task: JoinHandle<Result<bool, IoFailure>>,
}

pub struct RegistryActor {
    name: String,
    store: MetricStore,
    scheduler: FlushScheduler,
    storage: Arc<dyn SnapshotStorage>,
    config: RegistryConfig,
    /// Last revision loaded, written, or cleared by this instance.
    revision: u64,
    in_flight: Option<InFlight>,
    last_command: Instant,
    mailbox: mpsc::Receiver<Command>,
}

impl RegistryActor {
    /// Start the task for registry `name` and return its address.
    pub fn spawn(
        name: impl Into<String>,
        storage: Arc<dyn SnapshotStorage>,
        config: RegistryConfig,
    ) -> (RegistryHandle, JoinHandle<()>) {
        let name = name.into();
        let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let actor = RegistryActor {
            name: name.clone(),
            store: MetricStore::with_sample_limit(config.max_samples_per_series),
            scheduler: FlushScheduler::new(config.quiescence_window),
            storage,
            config,
            revision: 0,
            in_flight: None,
            last_command: Instant::now(),
            mailbox: rx,
        };
        let task = tokio::spawn(actor.run());
        (RegistryHandle::new(&name, tx), task)
    }

    async fn run(mut self) {
        self.activate().await;
        self.last_command = Instant::now();

        loop {
            // Only one write at a time; a due flush waits for the current one.
            let deadline = match self.in_flight {
                Some(_) => None,
                None => self.scheduler.deadline(),
            };
            let idle_deadline = self.config.idle_timeout.map(|idle| self.last_command + idle);

            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(command) => {
                        self.last_command = Instant::now();
                        if self.handle(command).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        self.deactivate().await;
                        break;
                    }
                },
                (revision, outcome) = wait_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    self.log_flush(revision, outcome);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if self.scheduler.take_due(Instant::now()) {
                        self.start_flush();
                    }
                }
                _ = sleep_until(idle_deadline.unwrap_or_else(Instant::now)), if idle_deadline.is_some() => {
                    info!(registry = %self.name, "registry idle");
                    self.stop_idle().await;
                    break;
                }
            }
        }
    }

    /// Refuse new commands, serve the ones already queued, then flush and
    /// stop.
    async fn stop_idle(&mut self) {
        self.mailbox.close();
        while let Ok(command) = self.mailbox.try_recv() {
            if self.handle(command).await.is_break() {
                return;
            }
        }
        self.deactivate().await;
    }

    async fn activate(&mut self) {
        let storage = self.storage.clone();
        let name = self.name.clone();
        match run_blocking(self.config.write_timeout, move || storage.load(&name)).await {
            Ok(loaded) => {
                self.revision = loaded.revision;
                match loaded.snapshot {
                    Some(snapshot) => {
                        let report = promvault_metrics::restore(&snapshot, &mut self.store);
                        info!(
                            registry = %self.name,
                            metrics = report.restored,
                            skipped = report.skipped + loaded.dropped_records,
                            revision = loaded.revision,
                            "registry restored"
                        );
                    }
                    None => info!(registry = %self.name, "registry started empty"),
                }
            }
            Err(e) => {
                error!(registry = %self.name, error = %e, "failed to load snapshot; starting empty");
            }
        }
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Apply { op, reply } => {
                let result = op.apply(&mut self.store);
                if result.is_ok() && op.mutates() {
                    self.scheduler.notify(Instant::now());
                }
                let _ = reply.send(result);
            }
            Command::Metrics { reply } => {
                let _ = reply.send(promvault_metrics::encode(&self.store));
            }
            Command::Clear { reply } => {
                self.clear().await;
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.mailbox.close();
                self.deactivate().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Snapshot the store and write it in the background.
    fn start_flush(&mut self) {
        let snapshot = promvault_metrics::dump(&self.store);
        let revision = self.next_revision();
        let storage = self.storage.clone();
        let name = self.name.clone();
        debug!(registry = %self.name, revision, metrics = snapshot.records.len(), "flushing snapshot");

        let task = tokio::spawn(run_blocking(self.config.write_timeout, move || {
            storage.store(&name, revision, &snapshot)
        }));
        self.in_flight = Some(InFlight { revision, task });
    }

    /// Drop all state, in memory and on disk. A write already in flight
    /// carries an older revision and will be discarded by the store.
    async fn clear(&mut self) {
        self.scheduler.cancel();
        self.store.clear();

        let revision = self.next_revision();
        let storage = self.storage.clone();
        let name = self.name.clone();
        match run_blocking(self.config.write_timeout, move || storage.delete(&name, revision)).await {
            Ok(true) => info!(registry = %self.name, revision, "registry cleared"),
            Ok(false) => warn!(registry = %self.name, revision, "snapshot delete superseded by a newer revision"),
            Err(e) => error!(registry = %self.name, error = %e, "failed to delete snapshot"),
        }
    }

    /// Write any pending state before the task exits.
    async fn deactivate(&mut self) {
        if let Some((revision, outcome)) = self.drain_in_flight().await {
            self.log_flush(revision, outcome);
        }
        if self.scheduler.is_pending() {
            self.scheduler.cancel();
            self.start_flush();
            if let Some((revision, outcome)) = self.drain_in_flight().await {
                self.log_flush(revision, outcome);
            }
        }
        info!(registry = %self.name, "registry stopped");
    }

    async fn drain_in_flight(&mut self) -> Option<(u64, Result<bool, IoFailure>)> {
        let in_flight = self.in_flight.take()?;
        let outcome = match in_flight.task.await {
            Ok(result) => result,
            Err(e) => Err(IoFailure::Task(e)),
        };
        Some((in_flight.revision, outcome))
    }

    fn log_flush(&self, revision: u64, outcome: Result<bool, IoFailure>) {
        match outcome {
            Ok(true) => debug!(registry = %self.name, revision, "snapshot written"),
            Ok(false) => warn!(registry = %self.name, revision, "snapshot superseded by a newer revision"),
            Err(IoFailure::TimedOut(limit)) => {
                error!(registry = %self.name, revision, ?limit, "snapshot write timed out")
            }
            Err(e) => error!(registry = %self.name, revision, error = %e, "snapshot write failed"),
        }
    }

    /// Revisions follow wall-clock nanoseconds so that a fresh instance
    /// outranks anything an earlier one wrote, but never repeat or go
    /// backwards within one instance.
    fn next_revision(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        self.revision = now.max(self.revision.saturating_add(1));
        self.revision
    }
}

async fn wait_in_flight(in_flight: &mut Option<InFlight>) -> (u64, Result<bool, IoFailure>) {
    match in_flight {
        Some(InFlight { revision, task }) => {
            let outcome = match task.await {
                Ok(result) => result,
                Err(e) => Err(IoFailure::Task(e)),
            };
            (*revision, outcome)
        }
        None => std::future::pending().await,
    }
}
