//! Prometheus text exposition format.
//!
//! Renders a [`MetricStore`] into the text format scraped by a Prometheus
//! server or compatible agent. Histogram bucket counts, sum, and count are
//! computed from the raw samples on every call.

use promvault_core::format_value;

use crate::labels::render_labels;
use crate::store::{Collector, MetricStore};

/// Render every metric in the store.
///
/// Output is a pure function of the store, so two calls without an
/// intervening mutation are byte-identical. An empty store renders as an
/// empty document.
pub fn encode(store: &MetricStore) -> String {
    let mut out = String::new();

    for (name, entry) in store.iter() {
        out.push_str(&format!("# HELP {} {}\n", name, escape_help(&entry.help)));
        out.push_str(&format!("# TYPE {} {}\n", name, entry.collector.kind()));

        match &entry.collector {
            Collector::Counter(series) | Collector::Gauge(series) => {
                for s in series.values() {
                    out.push_str(&format!(
                        "{}{} {}\n",
                        name,
                        render_labels(&s.labels, &[]),
                        format_value(s.value)
                    ));
                }
            }
            Collector::Histogram { buckets, series } => {
                for s in series.values() {
                    let counts = s.cumulative_counts(buckets);
                    for (bound, count) in buckets.iter().zip(&counts) {
                        let le = format_value(*bound);
                        out.push_str(&format!(
                            "{}_bucket{} {}\n",
                            name,
                            render_labels(&s.labels, &[("le", le.as_str())]),
                            count
                        ));
                    }
                    out.push_str(&format!(
                        "{}_bucket{} {}\n",
                        name,
                        render_labels(&s.labels, &[("le", "+Inf")]),
                        s.count()
                    ));

                    let labels = render_labels(&s.labels, &[]);
                    out.push_str(&format!("{}_sum{} {}\n", name, labels, format_value(s.sum())));
                    out.push_str(&format!("{}_count{} {}\n", name, labels, s.count()));
                }
            }
        }
    }

    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
