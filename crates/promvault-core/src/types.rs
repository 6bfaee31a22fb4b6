//! Shared types used across promvault crates.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of collector kinds a registry can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    /// The name used in `# TYPE` lines and snapshot records.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }

    /// Parse a kind name. Unknown names yield `None` rather than an error so
    /// callers can decide whether the record is fatal.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "counter" => Some(MetricKind::Counter),
            "gauge" => Some(MetricKind::Gauge),
            "histogram" => Some(MetricKind::Histogram),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A label value as supplied by a caller: text, or a number that is coerced
/// to its decimal form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Text(String),
    Number(f64),
}

impl LabelValue {
    pub fn into_text(self) -> String {
        match self {
            LabelValue::Text(s) => s,
            LabelValue::Number(n) => format_value(n),
        }
    }
}

impl From<&str> for LabelValue {
    fn from(s: &str) -> Self {
        LabelValue::Text(s.to_string())
    }
}

impl From<String> for LabelValue {
    fn from(s: String) -> Self {
        LabelValue::Text(s)
    }
}

macro_rules! number_label {
    ($($t:ty),*) => {
        $(
            impl From<$t> for LabelValue {
                fn from(n: $t) -> Self {
                    LabelValue::Number(n as f64)
                }
            }
        )*
    };
}

number_label!(i32, i64, u16, u32, u64, usize, f64);

/// An unordered set of label pairs identifying one series within a metric.
///
/// Backed by a `BTreeMap`, so iteration is always in key order no matter how
/// the labels were inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

// Numeric values are accepted on the way in and coerced to text.
impl<'de> Deserialize<'de> for LabelSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let map = BTreeMap::<String, LabelValue>::deserialize(deserializer)?;
        Ok(map.into())
    }
}

impl LabelSet {
    /// The empty label-set ("no labels").
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<LabelValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<LabelValue>) {
        self.0.insert(name.into(), value.into().into_text());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Pairs in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<LabelValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = LabelSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for LabelSet
where
    K: Into<String>,
    V: Into<LabelValue>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl From<BTreeMap<String, LabelValue>> for LabelSet {
    fn from(map: BTreeMap<String, LabelValue>) -> Self {
        map.into_iter().collect()
    }
}

/// Render a sample value the way the exposition format expects: integers
/// without a trailing fraction, everything else with enough digits to
/// round-trip.
pub fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else if v == 0.0 {
        // Collapses -0.
        "0".to_string()
    } else {
        // `Display` for f64 is shortest-round-trip and never prints `.0`.
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in [MetricKind::Counter, MetricKind::Gauge, MetricKind::Histogram] {
            assert_eq!(MetricKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MetricKind::parse("summary"), None);
    }

    #[test]
    fn label_set_ignores_insertion_order() {
        let a = LabelSet::new().with("method", "GET").with("path", "/");
        let b = LabelSet::new().with("path", "/").with("method", "GET");
        assert_eq!(a, b);
        let keys: Vec<_> = a.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["method", "path"]);
    }

    #[test]
    fn numeric_label_values_are_coerced() {
        let labels = LabelSet::from([("status", 200)]);
        assert_eq!(labels.get("status"), Some("200"));

        let labels = LabelSet::new().with("ratio", 0.5);
        assert_eq!(labels.get("ratio"), Some("0.5"));
    }

    #[test]
    fn untagged_label_values_deserialize() {
        let raw = r#"{"method":"GET","status":404}"#;
        let labels: LabelSet = serde_json::from_str(raw).unwrap();
        assert_eq!(labels.get("method"), Some("GET"));
        assert_eq!(labels.get("status"), Some("404"));
    }

    #[test]
    fn value_formatting() {
        assert_eq!(format_value(3.0), "3");
        assert_eq!(format_value(-0.0), "0");
        assert_eq!(format_value(0.1), "0.1");
        assert_eq!(format_value(450.0), "450");
        assert_eq!(format_value(-2.5), "-2.5");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
    }
}
