//! Durable snapshot records.
//!
//! A snapshot is a JSON array with one record per metric. Histogram series
//! carry their raw observations (`{"raw": [...]}`) rather than bucket counts,
//! so boundaries can change between restarts without losing fidelity.

use promvault_core::LabelSet;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Full image of one registry's state. Replaces any prior image on write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub records: Vec<SnapshotRecord>,
}

/// One metric and all of its series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub name: String,
    pub help: String,
    /// Kept as text so an unknown kind decodes and can be skipped on restore.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<f64>>,
    pub data: Vec<SeriesRecord>,
}

/// One series: its labels and either a scalar or the raw samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    #[serde(default, skip_serializing_if = "LabelSet::is_empty")]
    pub labels: LabelSet,
    pub value: SeriesValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesValue {
    Scalar(f64),
    Raw { raw: Vec<f64> },
}

impl Snapshot {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a snapshot, dropping records that are not structurally valid.
    ///
    /// Only a document that is not a JSON array at all is an error. Each
    /// dropped record is logged; the returned count says how many.
    pub fn decode_lenient(bytes: &[u8]) -> Result<(Self, usize), serde_json::Error> {
        let raw: Vec<serde_json::Value> = serde_json::from_slice(bytes)?;
        let mut records = Vec::with_capacity(raw.len());
        let mut dropped = 0;
        for (index, value) in raw.into_iter().enumerate() {
            let name = value
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or("<unnamed>")
                .to_string();
            match serde_json::from_value::<SnapshotRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(index, %name, error = %e, "dropping malformed snapshot record");
                    dropped += 1;
                }
            }
        }
        Ok((Self { records }, dropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_matches_raw_dump() {
        let snapshot = Snapshot {
            records: vec![
                SnapshotRecord {
                    name: "http_requests".to_string(),
                    help: "reqs".to_string(),
                    kind: "counter".to_string(),
                    buckets: None,
                    data: vec![SeriesRecord {
                        labels: LabelSet::from([("method", "GET")]),
                        value: SeriesValue::Scalar(3.0),
                    }],
                },
                SnapshotRecord {
                    name: "latency".to_string(),
                    help: "lat".to_string(),
                    kind: "histogram".to_string(),
                    buckets: Some(vec![50.0, 100.0]),
                    data: vec![SeriesRecord {
                        labels: LabelSet::new(),
                        value: SeriesValue::Raw { raw: vec![10.0, 60.0] },
                    }],
                },
            ],
        };

        let json: serde_json::Value = serde_json::from_slice(&snapshot.encode().unwrap()).unwrap();
        assert_eq!(json[0]["type"], "counter");
        assert_eq!(json[0]["data"][0]["labels"]["method"], "GET");
        assert_eq!(json[0]["data"][0]["value"], 3.0);
        assert!(json[0].get("buckets").is_none());
        assert_eq!(json[1]["data"][0]["value"]["raw"][1], 60.0);
        assert!(json[1]["data"][0].get("labels").is_none());

        let (decoded, dropped) = Snapshot::decode_lenient(&snapshot.encode().unwrap()).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn unknown_kind_still_decodes() {
        let raw = br#"[{"name":"s","help":"h","type":"summary","data":[]}]"#;
        let (decoded, dropped) = Snapshot::decode_lenient(raw).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(decoded.records[0].kind, "summary");
    }

    #[test]
    fn malformed_records_are_dropped_individually() {
        let raw = br#"[
            {"name":"broken","help":"h","type":"counter"},
            {"name":"ok","help":"h","type":"gauge","data":[{"value":-2}]},
            42
        ]"#;
        let (decoded, dropped) = Snapshot::decode_lenient(raw).unwrap();
        assert_eq!(dropped, 2);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].name, "ok");
        assert_eq!(decoded.records[0].data[0].value, SeriesValue::Scalar(-2.0));
    }

    #[test]
    fn non_array_document_is_an_error() {
        assert!(Snapshot::decode_lenient(b"{\"name\":1}").is_err());
        assert!(Snapshot::decode_lenient(b"not json").is_err());
    }
}
