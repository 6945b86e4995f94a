//! Request executor: runs one item against the margin service with a bounded
//! retry policy and classifies every attempt.
//!
//! Holds no per-item state, so many workers may share one executor.

use crate::client::{CallError, MarginService};
use crate::config::RetryConfig;
use crate::engine::progress::RunMetrics;
use crate::model::{Disposition, ItemId, ItemOutcome, ItemReport, ItemResult, WorkItem};
use crate::telemetry::dispatch::{record_item_disposition, start_item_span};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, warn};

/// JSON pointers to the fields a well-formed estimator response must carry.
pub const INITIAL_MARGIN_PATH: &str = "/portfolio_margin/0/initial_margin";
pub const COMPONENT_MARGIN_PATH: &str = "/drilldowns/0/component_margin";
pub const PREMIUM_MARGIN_PATH: &str = "/drilldowns/0/premium_margin";

pub struct RequestExecutor<S> {
    service: Arc<S>,
    retry: RetryConfig,
    call_timeout: Duration,
    metrics: Arc<RunMetrics>,
    cancel: CancellationToken,
}

impl<S: MarginService> RequestExecutor<S> {
    pub fn new(
        service: Arc<S>,
        retry: RetryConfig,
        call_timeout: Duration,
        metrics: Arc<RunMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            retry,
            call_timeout,
            metrics,
            cancel,
        }
    }

    pub fn metrics(&self) -> &Arc<RunMetrics> {
        &self.metrics
    }

    /// Drive one item to a terminal disposition.
    ///
    /// Attempts run sequentially, never concurrently with each other.
    pub async fn execute(&self, item: &WorkItem) -> ItemReport {
        let span = start_item_span(item.id());
        let report = self.execute_inner(item).instrument(span.clone()).await;
        record_item_disposition(&span, report.attempts, report.disposition.label());
        self.metrics.record_disposition(&report.disposition);
        report
    }

    async fn execute_inner(&self, item: &WorkItem) -> ItemReport {
        let id = item.id();
        let max = self.retry.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            if self.cancel.is_cancelled() {
                return cancelled(id, attempts);
            }

            attempts += 1;
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.metrics.record_attempt("cancelled");
                    return cancelled(id, attempts);
                }
                outcome = self.attempt(item) => outcome,
            };

            let reason = match outcome {
                ItemOutcome::Success(result) => {
                    debug!(%id, attempts, "item succeeded");
                    return ItemReport {
                        id,
                        attempts,
                        disposition: Disposition::Succeeded(result),
                    };
                }
                ItemOutcome::PermanentFailure(reason) => {
                    error!(%id, attempts, %reason, "item failed permanently, not retrying");
                    return failed(id, attempts, reason);
                }
                ItemOutcome::RetryableFailure(reason) => reason,
            };

            if attempts >= max {
                error!(%id, attempts, %reason, "item failed, retries exhausted");
                let reason = format!("exhausted {attempts}/{max} attempts: {reason}");
                return failed(id, attempts, reason);
            }

            let backoff = self.retry.backoff(attempts);
            warn!(
                %id,
                attempt = attempts,
                max_attempts = max,
                backoff_ms = backoff.as_millis() as u64,
                %reason,
                "retryable failure"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return cancelled(id, attempts),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// Issue exactly one remote call and classify it.
    pub async fn attempt(&self, item: &WorkItem) -> ItemOutcome {
        let call = tokio::time::timeout(self.call_timeout, self.service.estimate(item.params()));
        let response = match call.await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                self.metrics.record_attempt(e.kind());
                return ItemOutcome::RetryableFailure(e.to_string());
            }
            Err(_) => {
                self.metrics.record_attempt(CallError::Timeout.kind());
                return ItemOutcome::RetryableFailure(CallError::Timeout.to_string());
            }
        };

        match extract_result(item.id(), &response) {
            Ok(result) => {
                self.metrics.record_attempt("success");
                ItemOutcome::Success(result)
            }
            Err(reason) => {
                self.metrics.record_attempt("structural");
                ItemOutcome::PermanentFailure(reason)
            }
        }
    }
}

/// Read the margin fields from a decoded response.
///
/// A missing or non-numeric field means the response shape changed, which
/// retrying cannot fix.
pub fn extract_result(
    id: ItemId,
    response: &serde_json::Value,
) -> std::result::Result<ItemResult, String> {
    let field = |path: &str| {
        response
            .pointer(path)
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| format!("response missing numeric field at {path}"))
    };

    Ok(ItemResult {
        id,
        initial_margin: field(INITIAL_MARGIN_PATH)?,
        component_margin: field(COMPONENT_MARGIN_PATH)?,
        premium_margin: field(PREMIUM_MARGIN_PATH)?,
    })
}

fn failed(id: ItemId, attempts: u32, reason: String) -> ItemReport {
    ItemReport {
        id,
        attempts,
        disposition: Disposition::Failed(reason),
    }
}

fn cancelled(id: ItemId, attempts: u32) -> ItemReport {
    debug!(%id, attempts, "item cancelled");
    ItemReport {
        id,
        attempts,
        disposition: Disposition::Cancelled,
    }
}
