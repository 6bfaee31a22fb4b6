//! Caller-side handles for a running registry.
//!
//! Handles hold no metric state. Each method sends one operation to the
//! registry task and waits only for it to be applied in memory; persistence
//! happens later, in the background.

use std::sync::Arc;

use promvault_core::LabelSet;
use promvault_metrics::MetricDescriptor;
use tokio::sync::{mpsc, oneshot};

use crate::actor::{Command, Operation};
use crate::error::RegistryError;

/// Cloneable address of one registry instance.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    name: Arc<str>,
    mailbox: mpsc::Sender<Command>,
}

impl RegistryHandle {
    pub(crate) fn new(name: &str, mailbox: mpsc::Sender<Command>) -> Self {
        Self {
            name: Arc::from(name),
            mailbox,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the registry task is still accepting operations.
    pub fn is_running(&self) -> bool {
        !self.mailbox.is_closed()
    }

    /// Fetch or create a counter.
    pub async fn counter(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
    ) -> Result<Counter, RegistryError> {
        let desc = MetricDescriptor::counter(name, help);
        self.apply(Operation::Register(desc.clone())).await?;
        Ok(Counter {
            registry: self.clone(),
            desc,
        })
    }

    /// Fetch or create a gauge.
    pub async fn gauge(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
    ) -> Result<Gauge, RegistryError> {
        let desc = MetricDescriptor::gauge(name, help);
        self.apply(Operation::Register(desc.clone())).await?;
        Ok(Gauge {
            registry: self.clone(),
            desc,
        })
    }

    /// Fetch or create a histogram. Boundaries must be finite and strictly
    /// ascending; an existing histogram keeps its original boundaries.
    pub async fn histogram(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
        buckets: Vec<f64>,
    ) -> Result<Histogram, RegistryError> {
        let desc = MetricDescriptor::histogram(name, help, buckets);
        self.apply(Operation::Register(desc.clone())).await?;
        Ok(Histogram {
            registry: self.clone(),
            desc,
        })
    }

    /// Current state in Prometheus text format.
    pub async fn metrics(&self) -> Result<String, RegistryError> {
        self.request(|reply| Command::Metrics { reply }).await
    }

    /// Drop every metric and delete the durable snapshot.
    pub async fn clear(&self) -> Result<(), RegistryError> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// Flush pending state and stop the registry task.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub(crate) async fn apply(&self, op: Operation) -> Result<(), RegistryError> {
        self.request(|reply| Command::Apply { op, reply }).await??;
        Ok(())
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(command(tx))
            .await
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> RegistryError {
        RegistryError::Unavailable(self.name.to_string())
    }
}

/// A monotonically increasing metric.
#[derive(Debug, Clone)]
pub struct Counter {
    registry: RegistryHandle,
    desc: MetricDescriptor,
}

impl Counter {
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub async fn inc(&self, labels: impl Into<LabelSet>) -> Result<(), RegistryError> {
        self.add(1.0, labels).await
    }

    /// Fails with `InvalidOperation` for negative or non-finite amounts.
    pub async fn add(&self, amount: f64, labels: impl Into<LabelSet>) -> Result<(), RegistryError> {
        self.registry
            .apply(Operation::Increment {
                desc: self.desc.clone(),
                labels: labels.into(),
                amount,
            })
            .await
    }

    pub async fn reset(&self, labels: impl Into<LabelSet>) -> Result<(), RegistryError> {
        reset(&self.registry, &self.desc, labels.into()).await
    }

    pub async fn reset_all(&self) -> Result<(), RegistryError> {
        reset_all(&self.registry, &self.desc).await
    }
}

/// A metric that can go up and down.
#[derive(Debug, Clone)]
pub struct Gauge {
    registry: RegistryHandle,
    desc: MetricDescriptor,
}

impl Gauge {
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub async fn inc(&self, labels: impl Into<LabelSet>) -> Result<(), RegistryError> {
        self.add(1.0, labels).await
    }

    pub async fn dec(&self, labels: impl Into<LabelSet>) -> Result<(), RegistryError> {
        self.sub(1.0, labels).await
    }

    pub async fn add(&self, amount: f64, labels: impl Into<LabelSet>) -> Result<(), RegistryError> {
        self.registry
            .apply(Operation::Increment {
                desc: self.desc.clone(),
                labels: labels.into(),
                amount,
            })
            .await
    }

    pub async fn sub(&self, amount: f64, labels: impl Into<LabelSet>) -> Result<(), RegistryError> {
        self.registry
            .apply(Operation::Decrement {
                desc: self.desc.clone(),
                labels: labels.into(),
                amount,
            })
            .await
    }

    pub async fn reset(&self, labels: impl Into<LabelSet>) -> Result<(), RegistryError> {
        reset(&self.registry, &self.desc, labels.into()).await
    }

    pub async fn reset_all(&self) -> Result<(), RegistryError> {
        reset_all(&self.registry, &self.desc).await
    }
}

/// A distribution over fixed bucket boundaries.
#[derive(Debug, Clone)]
pub struct Histogram {
    registry: RegistryHandle,
    desc: MetricDescriptor,
}

impl Histogram {
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub async fn observe(&self, value: f64, labels: impl Into<LabelSet>) -> Result<(), RegistryError> {
        self.registry
            .apply(Operation::Observe {
                desc: self.desc.clone(),
                labels: labels.into(),
                value,
            })
            .await
    }

    pub async fn reset(&self, labels: impl Into<LabelSet>) -> Result<(), RegistryError> {
        reset(&self.registry, &self.desc, labels.into()).await
    }

    pub async fn reset_all(&self) -> Result<(), RegistryError> {
        reset_all(&self.registry, &self.desc).await
    }
}

async fn reset(
    registry: &RegistryHandle,
    desc: &MetricDescriptor,
    labels: LabelSet,
) -> Result<(), RegistryError> {
    registry
        .apply(Operation::Reset {
            desc: desc.clone(),
            labels,
        })
        .await
}

async fn reset_all(registry: &RegistryHandle, desc: &MetricDescriptor) -> Result<(), RegistryError> {
    registry
        .apply(Operation::ResetAll { desc: desc.clone() })
        .await
}
