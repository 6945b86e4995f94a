//! Seams to the remote systems the dispatcher talks to.
//!
//! [`MarginService`] is the per-item remote computation; [`CatalogSource`]
//! supplies the initial list of instruments. [`PrismaClient`] implements
//! both over HTTP. Tests substitute in-process fakes.

mod prisma;

pub use prisma::{PrismaClient, estimator_request};

use crate::error::Result;
use crate::model::SeriesRecord;
use std::future::Future;
use thiserror::Error;

/// Why a single remote call did not yield a decodable body.
///
/// Every variant is transient from the executor's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("call timed out")]
    Timeout,

    #[error("status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response body: {0}")]
    Malformed(String),
}

impl CallError {
    /// Short label for metrics and span fields.
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::Transport(_) => "transport",
            CallError::Timeout => "timeout",
            CallError::Status { .. } => "status",
            CallError::Malformed(_) => "malformed",
        }
    }
}

/// Remote margin computation: one call per attempt.
pub trait MarginService: Send + Sync + 'static {
    /// Submit one item's parameters and return the decoded response body.
    fn estimate(
        &self,
        params: &serde_json::Value,
    ) -> impl Future<Output = std::result::Result<serde_json::Value, CallError>> + Send;
}

/// Upstream source of the run's work items.
pub trait CatalogSource {
    /// Fetch every series listed for `product`.
    fn fetch_series(&self, product: &str) -> impl Future<Output = Result<Vec<SeriesRecord>>> + Send;
}
