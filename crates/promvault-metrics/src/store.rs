//! Metric store — every metric of one registry and all of its series.
//!
//! Metrics are kept in a `BTreeMap` keyed by name and series in a `BTreeMap`
//! keyed by [`canonical_key`], so iteration order is a pure function of the
//! state. Histogram series store raw observations only; bucket counts, sum,
//! and count are derived whenever they are needed.

use std::collections::{BTreeMap, VecDeque};

use promvault_core::{LabelSet, MetricKind};
use tracing::debug;

use crate::error::MetricsError;
use crate::labels::canonical_key;

/// The shape of a collector, carried by every operation so that the store can
/// create the metric on first touch.
#[derive(Debug, Clone, PartialEq)]
pub enum Instrument {
    Counter,
    Gauge,
    Histogram { buckets: Vec<f64> },
}

impl Instrument {
    pub fn kind(&self) -> MetricKind {
        match self {
            Instrument::Counter => MetricKind::Counter,
            Instrument::Gauge => MetricKind::Gauge,
            Instrument::Histogram { .. } => MetricKind::Histogram,
        }
    }
}

/// Identity of a metric as requested by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub instrument: Instrument,
}

impl MetricDescriptor {
    pub fn counter(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            instrument: Instrument::Counter,
        }
    }

    pub fn gauge(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            instrument: Instrument::Gauge,
        }
    }

    pub fn histogram(name: impl Into<String>, help: impl Into<String>, buckets: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            instrument: Instrument::Histogram { buckets },
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.instrument.kind()
    }
}

/// Value of one counter or gauge series.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarSeries {
    pub labels: LabelSet,
    pub value: f64,
}

/// Raw observations of one histogram series, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSeries {
    pub labels: LabelSet,
    pub samples: VecDeque<f64>,
}

impl HistogramSeries {
    /// Cumulative count of samples `<= boundary` for each boundary.
    pub fn cumulative_counts(&self, buckets: &[f64]) -> Vec<u64> {
        let mut counts = vec![0u64; buckets.len()];
        for &v in &self.samples {
            // First boundary that admits the sample.
            let idx = buckets.partition_point(|&b| b < v);
            if idx < counts.len() {
                counts[idx] += 1;
            }
        }
        let mut running = 0;
        for c in counts.iter_mut() {
            running += *c;
            *c = running;
        }
        counts
    }

    pub fn sum(&self) -> f64 {
        self.samples.iter().sum()
    }

    pub fn count(&self) -> u64 {
        self.samples.len() as u64
    }
}

/// Per-kind series storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Collector {
    Counter(BTreeMap<String, ScalarSeries>),
    Gauge(BTreeMap<String, ScalarSeries>),
    Histogram {
        buckets: Vec<f64>,
        series: BTreeMap<String, HistogramSeries>,
    },
}

impl Collector {
    fn new(instrument: &Instrument) -> Self {
        match instrument {
            Instrument::Counter => Collector::Counter(BTreeMap::new()),
            Instrument::Gauge => Collector::Gauge(BTreeMap::new()),
            Instrument::Histogram { buckets } => Collector::Histogram {
                buckets: buckets.clone(),
                series: BTreeMap::new(),
            },
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Collector::Counter(_) => MetricKind::Counter,
            Collector::Gauge(_) => MetricKind::Gauge,
            Collector::Histogram { .. } => MetricKind::Histogram,
        }
    }

    pub fn series_count(&self) -> usize {
        match self {
            Collector::Counter(series) | Collector::Gauge(series) => series.len(),
            Collector::Histogram { series, .. } => series.len(),
        }
    }
}

/// A registered metric: the help text fixed at creation and its series.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEntry {
    pub help: String,
    pub collector: Collector,
}

/// All metrics of one registry instance.
#[derive(Debug, Clone, Default)]
pub struct MetricStore {
    metrics: BTreeMap<String, MetricEntry>,
    /// Oldest samples beyond this many are evicted from a histogram series.
    max_samples_per_series: Option<usize>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose histogram series retain at most `max` raw samples.
    pub fn with_sample_limit(max: Option<usize>) -> Self {
        Self {
            metrics: BTreeMap::new(),
            max_samples_per_series: max,
        }
    }

    /// Return the metric named by `desc`, creating it empty if absent.
    ///
    /// First creation wins: a differing help text or bucket layout on a later
    /// call is ignored. Asking for an existing name as a different kind is a
    /// configuration error.
    pub fn get_or_create(&mut self, desc: &MetricDescriptor) -> Result<&mut MetricEntry, MetricsError> {
        if let Instrument::Histogram { buckets } = &desc.instrument {
            validate_buckets(&desc.name, buckets)?;
        }
        let entry = self.metrics.entry(desc.name.clone()).or_insert_with(|| {
            debug!(name = %desc.name, kind = %desc.kind(), "metric created");
            MetricEntry {
                help: desc.help.clone(),
                collector: Collector::new(&desc.instrument),
            }
        });
        if entry.collector.kind() != desc.kind() {
            return Err(MetricsError::Configuration(format!(
                "metric `{}` is already registered as a {}, not a {}",
                desc.name,
                entry.collector.kind(),
                desc.kind()
            )));
        }
        if entry.help != desc.help {
            debug!(name = %desc.name, "keeping original help text");
        }
        Ok(entry)
    }

    /// Add `amount` to a counter or gauge series.
    ///
    /// Counters reject negative amounts; histograms reject the call.
    pub fn increment(
        &mut self,
        desc: &MetricDescriptor,
        labels: &LabelSet,
        amount: f64,
    ) -> Result<(), MetricsError> {
        ensure_finite(&desc.name, "amount", amount)?;
        if desc.kind() == MetricKind::Counter && amount < 0.0 {
            return Err(MetricsError::InvalidOperation(format!(
                "counter `{}` cannot be incremented by a negative amount ({amount})",
                desc.name
            )));
        }
        let entry = self.get_or_create(desc)?;
        match &mut entry.collector {
            Collector::Counter(series) | Collector::Gauge(series) => {
                let key = canonical_key(labels);
                let slot = series.entry(key).or_insert_with(|| ScalarSeries {
                    labels: labels.clone(),
                    value: 0.0,
                });
                slot.value += amount;
                Ok(())
            }
            Collector::Histogram { .. } => Err(unsupported(&desc.name, "increment", MetricKind::Histogram)),
        }
    }

    /// Subtract `amount` from a gauge series.
    pub fn decrement(
        &mut self,
        desc: &MetricDescriptor,
        labels: &LabelSet,
        amount: f64,
    ) -> Result<(), MetricsError> {
        match desc.kind() {
            MetricKind::Gauge => {
                ensure_finite(&desc.name, "amount", amount)?;
                self.increment(desc, labels, -amount)
            }
            kind @ (MetricKind::Counter | MetricKind::Histogram) => {
                Err(unsupported(&desc.name, "decrement", kind))
            }
        }
    }

    /// Append one observation to a histogram series.
    ///
    /// `le` is reserved for the bucket bound in exposition and is rejected as
    /// a user label.
    pub fn observe(
        &mut self,
        desc: &MetricDescriptor,
        labels: &LabelSet,
        value: f64,
    ) -> Result<(), MetricsError> {
        ensure_finite(&desc.name, "observation", value)?;
        if matches!(desc.instrument, Instrument::Histogram { .. }) && labels.get(BUCKET_LABEL).is_some() {
            return Err(MetricsError::InvalidOperation(format!(
                "histogram `{}` cannot use the reserved label `{BUCKET_LABEL}`",
                desc.name
            )));
        }
        let limit = self.max_samples_per_series;
        let entry = self.get_or_create(desc)?;
        match &mut entry.collector {
            Collector::Histogram { series, .. } => {
                let key = canonical_key(labels);
                let slot = series.entry(key).or_insert_with(|| HistogramSeries {
                    labels: labels.clone(),
                    samples: VecDeque::new(),
                });
                slot.samples.push_back(value);
                if let Some(max) = limit {
                    while slot.samples.len() > max {
                        slot.samples.pop_front();
                    }
                }
                Ok(())
            }
            Collector::Counter(_) => Err(unsupported(&desc.name, "observe", MetricKind::Counter)),
            Collector::Gauge(_) => Err(unsupported(&desc.name, "observe", MetricKind::Gauge)),
        }
    }

    /// Overwrite a counter or gauge series. Used for state restoration, not
    /// as a business operation, so counter monotonicity is not checked.
    pub(crate) fn set_scalar(
        &mut self,
        desc: &MetricDescriptor,
        labels: &LabelSet,
        value: f64,
    ) -> Result<(), MetricsError> {
        ensure_finite(&desc.name, "value", value)?;
        let entry = self.get_or_create(desc)?;
        match &mut entry.collector {
            Collector::Counter(series) | Collector::Gauge(series) => {
                series.insert(
                    canonical_key(labels),
                    ScalarSeries {
                        labels: labels.clone(),
                        value,
                    },
                );
                Ok(())
            }
            Collector::Histogram { .. } => Err(unsupported(&desc.name, "set", MetricKind::Histogram)),
        }
    }

    /// Remove one series. Its value reads as absent until touched again.
    pub fn reset_series(&mut self, desc: &MetricDescriptor, labels: &LabelSet) -> Result<(), MetricsError> {
        let key = canonical_key(labels);
        let entry = self.get_or_create(desc)?;
        match &mut entry.collector {
            Collector::Counter(series) | Collector::Gauge(series) => {
                series.remove(&key);
            }
            Collector::Histogram { series, .. } => {
                series.remove(&key);
            }
        }
        Ok(())
    }

    /// Remove every series of a metric, keeping the metric itself.
    pub fn reset_all(&mut self, desc: &MetricDescriptor) -> Result<(), MetricsError> {
        let entry = self.get_or_create(desc)?;
        match &mut entry.collector {
            Collector::Counter(series) | Collector::Gauge(series) => series.clear(),
            Collector::Histogram { series, .. } => series.clear(),
        }
        Ok(())
    }

    /// Remove every metric.
    pub fn clear(&mut self) {
        self.metrics.clear();
    }

    pub fn get(&self, name: &str) -> Option<&MetricEntry> {
        self.metrics.get(name)
    }

    /// Metrics in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricEntry)> {
        self.metrics.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

fn validate_buckets(name: &str, buckets: &[f64]) -> Result<(), MetricsError> {
    if buckets.is_empty() {
        return Err(MetricsError::Configuration(format!(
            "histogram `{name}` needs at least one bucket boundary"
        )));
    }
    if let Some(b) = buckets.iter().find(|b| !b.is_finite()) {
        return Err(MetricsError::Configuration(format!(
            "histogram `{name}` has a non-finite bucket boundary ({b})"
        )));
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(MetricsError::Configuration(format!(
            "histogram `{name}` bucket boundaries must be strictly ascending"
        )));
    }
    Ok(())
}

const BUCKET_LABEL: &str = "le";

fn ensure_finite(name: &str, what: &str, v: f64) -> Result<(), MetricsError> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(MetricsError::InvalidOperation(format!(
            "{what} for `{name}` must be finite, got {v}"
        )))
    }
}

fn unsupported(name: &str, op: &str, kind: MetricKind) -> MetricsError {
    MetricsError::InvalidOperation(format!("`{op}` is not supported by {kind} `{name}`"))
}
