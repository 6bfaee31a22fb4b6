//! Conversion between a [`MetricStore`] and its durable [`Snapshot`].
//!
//! Counters and gauges are stored as their current scalar. Histograms are
//! stored as raw samples and rebuilt on restore by replaying every sample
//! through [`MetricStore::observe`], the same path live observations take.

use promvault_core::MetricKind;
use promvault_state::{SeriesRecord, SeriesValue, Snapshot, SnapshotRecord};
use tracing::warn;

use crate::store::{Collector, MetricDescriptor, MetricStore};

/// Outcome of [`restore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub skipped: usize,
}

/// Flatten the store into one record per metric.
pub fn dump(store: &MetricStore) -> Snapshot {
    let records = store
        .iter()
        .map(|(name, entry)| {
            let (buckets, data) = match &entry.collector {
                Collector::Counter(series) | Collector::Gauge(series) => (
                    None,
                    series
                        .values()
                        .map(|s| SeriesRecord {
                            labels: s.labels.clone(),
                            value: SeriesValue::Scalar(s.value),
                        })
                        .collect(),
                ),
                Collector::Histogram { buckets, series } => (
                    Some(buckets.clone()),
                    series
                        .values()
                        .map(|s| SeriesRecord {
                            labels: s.labels.clone(),
                            value: SeriesValue::Raw {
                                raw: s.samples.iter().copied().collect(),
                            },
                        })
                        .collect(),
                ),
            };
            SnapshotRecord {
                name: name.to_string(),
                help: entry.help.clone(),
                kind: entry.collector.kind().as_str().to_string(),
                buckets,
                data,
            }
        })
        .collect();
    Snapshot { records }
}

/// Load every usable record of `snapshot` into `store`.
///
/// A record with an unknown kind, a value shape that does not match its
/// kind, invalid buckets, or a name clash with a different kind is skipped
/// as a whole and logged; the remaining records are still restored.
pub fn restore(snapshot: &Snapshot, store: &mut MetricStore) -> RestoreReport {
    let mut report = RestoreReport::default();
    for record in &snapshot.records {
        match restore_record(record, store) {
            Ok(()) => report.restored += 1,
            Err(reason) => {
                warn!(name = %record.name, kind = %record.kind, %reason, "skipping snapshot record");
                report.skipped += 1;
            }
        }
    }
    report
}

fn restore_record(record: &SnapshotRecord, store: &mut MetricStore) -> Result<(), String> {
    let kind = MetricKind::parse(&record.kind).ok_or_else(|| "unrecognized metric kind".to_string())?;

    match kind {
        MetricKind::Counter | MetricKind::Gauge => {
            let values = record
                .data
                .iter()
                .map(|s| match s.value {
                    SeriesValue::Scalar(v) if v.is_finite() => Ok(v),
                    SeriesValue::Scalar(_) => Err("non-finite series value".to_string()),
                    SeriesValue::Raw { .. } => Err("raw samples on a scalar metric".to_string()),
                })
                .collect::<Result<Vec<_>, _>>()?;
            let desc = if kind == MetricKind::Counter {
                MetricDescriptor::counter(&record.name, &record.help)
            } else {
                MetricDescriptor::gauge(&record.name, &record.help)
            };
            store.get_or_create(&desc).map_err(|e| e.to_string())?;
            for (series, value) in record.data.iter().zip(values) {
                store
                    .set_scalar(&desc, &series.labels, value)
                    .map_err(|e| e.to_string())?;
            }
        }
        MetricKind::Histogram => {
            let buckets = record
                .buckets
                .clone()
                .ok_or_else(|| "histogram record without buckets".to_string())?;
            let samples = record
                .data
                .iter()
                .map(|s| match &s.value {
                    SeriesValue::Raw { raw } if raw.iter().all(|v| v.is_finite()) => Ok(raw),
                    SeriesValue::Raw { .. } => Err("non-finite raw sample".to_string()),
                    SeriesValue::Scalar(_) => Err("scalar value on a histogram".to_string()),
                })
                .collect::<Result<Vec<_>, _>>()?;
            let desc = MetricDescriptor::histogram(&record.name, &record.help, buckets);
            store.get_or_create(&desc).map_err(|e| e.to_string())?;
            for (series, raw) in record.data.iter().zip(samples) {
                for &v in raw {
                    store.observe(&desc, &series.labels, v).map_err(|e| e.to_string())?;
                }
            }
        }
    }
    Ok(())
}
