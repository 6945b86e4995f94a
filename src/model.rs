//! Core data model.
//!
//! A work item is one instrument whose margin needs estimating. It carries
//! an identifier (the instrument id) and the request payload sent to the
//! estimator. Outcomes, results and catalog records hang off that id.

use serde::{Deserialize, Serialize};
use serde_json::json;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Instrument identifier. Unique within a run; orders the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of batch input. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    id: ItemId,
    /// Request payload for the remote call. Opaque to the dispatcher.
    params: serde_json::Value,
}

impl WorkItem {
    pub fn new(id: ItemId, params: serde_json::Value) -> Self {
        Self { id, params }
    }

    /// A single-line ETD position: one short contract of the instrument.
    pub fn etd(id: ItemId) -> Self {
        Self::new(
            id,
            json!({
                "line_no": 1,
                "iid": id.0,
                "net_ls_balance": -1,
            }),
        )
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn params(&self) -> &serde_json::Value {
        &self.params
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Classification of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Success(ItemResult),
    /// Transient: transport, timeout, bad status or undecodable body.
    RetryableFailure(String),
    /// Data-shaped: the response decoded but lacks expected fields.
    PermanentFailure(String),
}

/// Computed fields for one instrument. Only built on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: ItemId,
    pub initial_margin: f64,
    pub component_margin: f64,
    pub premium_margin: f64,
}

/// Terminal state of an item after the executor is done with it.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Succeeded(ItemResult),
    Failed(String),
    /// The run was cancelled before the item reached another terminal state.
    Cancelled,
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Succeeded(_) => "succeeded",
            Disposition::Failed(_) => "failed",
            Disposition::Cancelled => "cancelled",
        }
    }
}

/// What the executor hands back for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub id: ItemId,
    /// Remote calls issued for this item.
    pub attempts: u32,
    pub disposition: Disposition,
}

/// A permanently failed item, kept for diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub id: ItemId,
    pub attempts: u32,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// One chunk's dispatch plan. Lives for the duration of the chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlan {
    pub index: usize,
    pub size: usize,
    pub started_at: tokio::time::Instant,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// One series from the upstream catalog.
///
/// Only `iid` is required. The metadata used when merging results is read
/// leniently: `contract_date` may arrive as a number or a `YYYYMMDD` string,
/// and a value that cannot be read becomes `None` rather than rejecting the
/// record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub iid: ItemId,
    /// Expiry as `YYYYMMDD`.
    #[serde(default, deserialize_with = "lenient::int")]
    pub contract_date: Option<u32>,
    /// `C` or `P`.
    #[serde(default, deserialize_with = "lenient::text")]
    pub call_put_flag: Option<String>,
    #[serde(default, deserialize_with = "lenient::float")]
    pub exercise_price: Option<f64>,
    /// Remaining catalog fields, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SeriesRecord {
    pub fn work_item(&self) -> WorkItem {
        WorkItem::etd(self.iid)
    }
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn int<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
        Ok(match Value::deserialize(de)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                        .map(|f| f as u64)
                })
                .and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn float<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
        Ok(match Value::deserialize(de)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|f: &f64| f.is_finite()))
    }

    pub fn text<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(de)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etd_payload_carries_the_instrument_id() {
        let item = WorkItem::etd(ItemId(42));
        assert_eq!(item.id(), ItemId(42));
        assert_eq!(item.params()["iid"], 42);
        assert_eq!(item.params()["net_ls_balance"], -1);
    }

    #[test]
    fn series_record_keeps_unknown_fields() {
        let record: SeriesRecord = serde_json::from_value(json!({
            "iid": 7,
            "contract_date": 20251219,
            "call_put_flag": "C",
            "exercise_price": 18000.0,
            "product_id": "ODAX",
        }))
        .unwrap();
        assert_eq!(record.iid, ItemId(7));
        assert_eq!(record.contract_date, Some(20251219));
        assert_eq!(record.extra["product_id"], "ODAX");
    }

    #[test]
    fn series_record_reads_metadata_leniently() {
        let record: SeriesRecord = serde_json::from_value(json!({
            "iid": 8,
            "contract_date": "20251219",
            "exercise_price": "18000.5",
        }))
        .unwrap();
        assert_eq!(record.contract_date, Some(20251219));
        assert_eq!(record.call_put_flag, None);
        assert_eq!(record.exercise_price, Some(18000.5));

        let odd: SeriesRecord = serde_json::from_value(json!({
            "iid": 9,
            "contract_date": "soon",
            "call_put_flag": null,
            "exercise_price": [],
        }))
        .unwrap();
        assert_eq!(odd.contract_date, None);
        assert_eq!(odd.call_put_flag, None);
        assert_eq!(odd.exercise_price, None);
    }
}
