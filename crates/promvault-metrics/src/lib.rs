//! promvault-metrics — the in-memory side of a promvault registry.
//!
//! Holds counters, gauges, and histograms keyed by metric name and
//! label-set, renders them as Prometheus text, and converts them to and from
//! the durable snapshot records in `promvault-state`.
//!
//! # Architecture
//!
//! ```text
//! MetricStore
//!   ├── get_or_create() / increment() / observe() / reset_*()
//!   ├── canonical_key() ← series identity, independent of label order
//!   ├── encode() → text/plain for /metrics
//!   └── dump() / restore() ↔ Snapshot
//! ```
//!
//! The store does no locking of its own. It is meant to be owned by exactly
//! one registry actor, which serializes every call.

pub mod error;
pub mod exposition;
pub mod labels;
pub mod snapshot;
pub mod store;

pub use error::MetricsError;
pub use exposition::encode;
pub use labels::canonical_key;
pub use snapshot::{dump, restore, RestoreReport};
pub use store::{Collector, HistogramSeries, Instrument, MetricDescriptor, MetricEntry, MetricStore, ScalarSeries};
