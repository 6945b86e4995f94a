//! Margin row upsert keyed by `(expiry_date, option_type, strike)`.

use crate::error::Result;
use crate::sink::{MarginKey, MarginRow, OptionType, ResultSink};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::collections::HashMap;
use tracing::info;

/// Rows per INSERT statement. Six binds per row keeps this far below
/// Postgres' 65535 parameter limit.
const UPSERT_BATCH: usize = 1000;

/// A stored margin row as read back from `option_margins`.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StoredMargin {
    pub expiry_date: NaiveDate,
    pub option_type: String,
    pub strike: f64,
    pub initial_margin: Option<f64>,
    pub premium_margin: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl super::Db {
    /// Upsert rows in one transaction. Returns the number of rows written.
    pub async fn upsert_margins(&self, rows: &[MarginRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        // One statement cannot update the same key twice; the last row wins.
        let mut latest: HashMap<MarginKey, &MarginRow> = HashMap::with_capacity(rows.len());
        for row in rows {
            latest.insert(row.key(), row);
        }
        let unique: Vec<&MarginRow> = latest.into_values().collect();

        let now = Utc::now();
        let mut tx = self.pool().begin().await?;
        let mut written = 0u64;

        for batch in unique.chunks(UPSERT_BATCH) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO option_margins (expiry_date, option_type, strike, initial_margin, premium_margin, updated_at) ",
            );
            qb.push_values(batch, |mut b, row| {
                b.push_bind(row.expiry_date)
                    .push_bind(row.option_type.as_str())
                    .push_bind(row.exercise_price)
                    .push_bind(row.initial_margin)
                    .push_bind(row.premium_margin)
                    .push_bind(now);
            });
            qb.push(
                " ON CONFLICT (expiry_date, option_type, strike) DO UPDATE SET
                   initial_margin = EXCLUDED.initial_margin,
                   premium_margin = EXCLUDED.premium_margin,
                   updated_at = EXCLUDED.updated_at",
            );
            written += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        info!(rows = written, "margins upserted");
        Ok(written as usize)
    }

    /// All stored rows for one option type, ordered by expiry and strike.
    pub async fn load_margins(&self, option_type: OptionType) -> Result<Vec<StoredMargin>> {
        let rows = sqlx::query_as::<_, StoredMargin>(
            "SELECT expiry_date, option_type, strike, initial_margin, premium_margin, updated_at
             FROM option_margins WHERE option_type = $1
             ORDER BY expiry_date, strike",
        )
        .bind(option_type.as_str())
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}

impl ResultSink for super::Db {
    async fn merge(&self, rows: &[MarginRow]) -> Result<usize> {
        self.upsert_margins(rows).await
    }
}
