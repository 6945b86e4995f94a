//! Result sinks: join results with catalog metadata and store them.
//!
//! Rows are keyed by their natural key `(expiry_date, option_type, strike)`.
//! Every sink upserts on that key, so merging the same rows again leaves the
//! stored state unchanged.

mod tsv;

pub use tsv::{TsvSink, render as render_tsv};

use crate::error::{Error, Result};
use crate::model::{ItemId, ItemResult, SeriesRecord};
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;
use tracing::{error, warn};

/// Downstream store for merged rows.
pub trait ResultSink {
    /// Upsert `rows`; returns how many rows were written.
    fn merge(&self, rows: &[MarginRow]) -> impl Future<Output = Result<usize>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Parse the catalog's `C` / `P` flag.
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "C" => Some(OptionType::Call),
            "P" => Some(OptionType::Put),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OptionType::Call => "CALL",
            OptionType::Put => "PUT",
        }
    }
}

/// Strike price with a total order, usable as a map key.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(transparent)]
pub struct Strike(pub f64);

impl PartialEq for Strike {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Strike {}

impl PartialOrd for Strike {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Strike {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Natural key of a stored margin row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarginKey {
    pub expiry_date: NaiveDate,
    pub option_type: OptionType,
    pub strike: Strike,
}

impl std::hash::Hash for Strike {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// A result joined with its series metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarginRow {
    pub iid: ItemId,
    /// Expiry as delivered by the catalog, `YYYYMMDD`.
    pub contract_date: u32,
    pub expiry_date: NaiveDate,
    pub call_put_flag: String,
    pub option_type: OptionType,
    pub exercise_price: f64,
    pub initial_margin: f64,
    pub premium_margin: f64,
}

impl MarginRow {
    pub fn key(&self) -> MarginKey {
        MarginKey {
            expiry_date: self.expiry_date,
            option_type: self.option_type,
            strike: Strike(self.exercise_price),
        }
    }

    fn build(series: &SeriesRecord, result: &ItemResult) -> Result<Self> {
        let contract_date = series
            .contract_date
            .ok_or_else(|| Error::Other("missing contract date".into()))?;
        let expiry_date = parse_contract_date(contract_date)?;
        let call_put_flag = series
            .call_put_flag
            .clone()
            .ok_or_else(|| Error::Other("missing call/put flag".into()))?;
        let option_type = OptionType::from_flag(&call_put_flag)
            .ok_or_else(|| Error::Other(format!("unknown call/put flag {call_put_flag:?}")))?;
        let exercise_price = series
            .exercise_price
            .ok_or_else(|| Error::Other("missing exercise price".into()))?;
        Ok(Self {
            iid: series.iid,
            contract_date,
            expiry_date,
            call_put_flag,
            option_type,
            exercise_price,
            initial_margin: result.initial_margin,
            premium_margin: result.premium_margin,
        })
    }
}

/// `20251219` -> 2025-12-19.
pub fn parse_contract_date(raw: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt((raw / 10_000) as i32, (raw / 100) % 100, raw % 100)
        .ok_or_else(|| Error::Other(format!("invalid contract date {raw}")))
}

/// Inner-join results with series records on the instrument id.
///
/// Series without a result are left out; rows whose metadata cannot be
/// converted are logged and skipped. Rows sharing a natural key collapse to
/// the one from the later series, so every key appears once. Output is
/// ordered by call/put flag, contract date and strike.
pub fn merge_rows(series: &[SeriesRecord], results: &[ItemResult]) -> Vec<MarginRow> {
    let by_id: HashMap<ItemId, &ItemResult> = results.iter().map(|r| (r.id, r)).collect();
    let mut by_key: HashMap<MarginKey, MarginRow> = HashMap::new();

    for s in series {
        let Some(result) = by_id.get(&s.iid) else {
            continue;
        };
        let row = match MarginRow::build(s, result) {
            Ok(row) => row,
            Err(e) => {
                warn!(iid = %s.iid, "skipping row: {e}");
                continue;
            }
        };
        if let Some(replaced) = by_key.insert(row.key(), row) {
            warn!(iid = %replaced.iid, "row replaced by a later series with the same key");
        }
    }

    let mut rows: Vec<MarginRow> = by_key.into_values().collect();
    rows.sort_by(|a, b| {
        a.call_put_flag
            .cmp(&b.call_put_flag)
            .then(a.contract_date.cmp(&b.contract_date))
            .then(a.exercise_price.total_cmp(&b.exercise_price))
    });
    rows
}

/// Merge into `sink`, logging a failure instead of returning it.
///
/// Returns the number of rows written, or `None` when the sink failed.
pub async fn deliver<S: ResultSink>(sink: &S, name: &str, rows: &[MarginRow]) -> Option<usize> {
    match sink.merge(rows).await {
        Ok(written) => Some(written),
        Err(e) => {
            error!(sink = name, rows = rows.len(), "storing results failed: {e}");
            None
        }
    }
}

/// In-process sink. Useful for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<BTreeMap<MarginKey, MarginRow>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored rows in key order.
    pub fn rows(&self) -> Vec<MarginRow> {
        match self.rows.lock() {
            Ok(rows) => rows.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }
}

impl ResultSink for MemorySink {
    async fn merge(&self, rows: &[MarginRow]) -> Result<usize> {
        let mut stored = self
            .rows
            .lock()
            .map_err(|_| Error::Other("memory sink lock poisoned".into()))?;
        for row in rows {
            stored.insert(row.key(), row.clone());
        }
        Ok(rows.len())
    }
}
