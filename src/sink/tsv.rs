//! Tab-separated export of merged rows.

use super::{MarginRow, ResultSink};
use crate::error::Result;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::info;

const HEADER: &str = "contract_date\tcall_put_flag\texercise_price\tinitial_margin\tpremium_margin";

/// Writes the full row set to one file, replacing any previous contents.
#[derive(Debug, Clone)]
pub struct TsvSink {
    path: PathBuf,
}

impl TsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

/// Render rows with a header line, one row per line.
pub fn render(rows: &[MarginRow]) -> String {
    let mut out = String::with_capacity(64 * (rows.len() + 1));
    out.push_str(HEADER);
    out.push('\n');
    for row in rows {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            row.contract_date,
            row.call_put_flag,
            row.exercise_price,
            row.initial_margin,
            row.premium_margin
        );
    }
    out
}

impl ResultSink for TsvSink {
    async fn merge(&self, rows: &[MarginRow]) -> Result<usize> {
        tokio::fs::write(&self.path, render(rows)).await?;
        info!(path = %self.path.display(), rows = rows.len(), "results written");
        Ok(rows.len())
    }
}
