//! Run orchestration: drain the queue chunk by chunk through the worker pool,
//! feeding each barrier into the admission controller.

use crate::client::MarginService;
use crate::config::DispatchConfig;
use crate::engine::admission::{AdmissionController, ChunkSample, Resize};
use crate::engine::executor::RequestExecutor;
use crate::engine::pool::WorkerPool;
use crate::engine::progress::{ProgressReporter, RunMetrics, RunReport};
use crate::engine::queue::ItemQueue;
use crate::error::Result;
use crate::model::{ChunkPlan, Disposition, FailureRecord, ItemId, ItemReport, ItemResult, WorkItem};
use crate::telemetry::dispatch::{record_chunk_outcome, start_chunk_span, start_run_span};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};
use uuid::Uuid;

/// What one chunk looked like and what the controller decided after it.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub index: usize,
    pub size: usize,
    pub successes: usize,
    pub elapsed: Duration,
    pub ema: f64,
    pub resize: Resize,
    /// Chunk size chosen for the following chunk.
    pub next_size: usize,
    pub delay: Duration,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub results: Vec<ItemResult>,
    pub failures: Vec<FailureRecord>,
    /// Items interrupted or never dispatched because the run was cancelled.
    pub cancelled: Vec<ItemId>,
    /// Remote calls issued per item.
    pub attempts: BTreeMap<ItemId, u32>,
    pub chunks: Vec<ChunkRecord>,
    pub report: RunReport,
}

#[derive(Default)]
struct Ledger {
    results: Vec<ItemResult>,
    failures: Vec<FailureRecord>,
    cancelled: Vec<ItemId>,
    attempts: BTreeMap<ItemId, u32>,
    chunks: Vec<ChunkRecord>,
}

impl Ledger {
    /// File a chunk's reports; returns how many succeeded.
    fn absorb(&mut self, reports: Vec<ItemReport>) -> usize {
        let mut successes = 0;
        for report in reports {
            self.attempts.insert(report.id, report.attempts);
            match report.disposition {
                Disposition::Succeeded(result) => {
                    successes += 1;
                    self.results.push(result);
                }
                Disposition::Failed(reason) => self.failures.push(FailureRecord {
                    id: report.id,
                    attempts: report.attempts,
                    reason,
                }),
                Disposition::Cancelled => self.cancelled.push(report.id),
            }
        }
        successes
    }

    fn finish(self, report: RunReport) -> RunOutcome {
        RunOutcome {
            results: self.results,
            failures: self.failures,
            cancelled: self.cancelled,
            attempts: self.attempts,
            chunks: self.chunks,
            report,
        }
    }
}

/// Adaptive parallel batch dispatcher.
pub struct Dispatcher<S> {
    service: Arc<S>,
    config: DispatchConfig,
    cancel: CancellationToken,
}

impl<S: MarginService> Dispatcher<S> {
    pub fn new(service: Arc<S>, config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            service,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token for runs.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts the run at chunk and call granularity.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatch every item and wait for the run to end.
    ///
    /// Per-item failures never fail the run; they are reported in the outcome.
    pub async fn run(&self, items: impl IntoIterator<Item = WorkItem>) -> RunOutcome {
        let queue = ItemQueue::new(items);
        let span = start_run_span(&Uuid::new_v4(), queue.total());
        self.drain(queue).instrument(span).await
    }

    async fn drain(&self, mut queue: ItemQueue) -> RunOutcome {
        let mut controller = AdmissionController::new(self.config.admission.clone());
        let run_metrics = RunMetrics::new(queue.total(), controller.chunk_size());
        let mut ledger = Ledger::default();

        if queue.is_empty() {
            info!("queue is empty, nothing to dispatch");
            return ledger.finish(run_metrics.report());
        }

        let executor = Arc::new(RequestExecutor::new(
            Arc::clone(&self.service),
            self.config.retry.clone(),
            self.config.call_timeout(),
            Arc::clone(&run_metrics),
            self.cancel.clone(),
        ));
        let pool = WorkerPool::spawn(executor, self.config.max_concurrency);

        let reporter_stop = CancellationToken::new();
        let reporter = (self.config.progress_interval_secs > 0).then(|| {
            let reporter = ProgressReporter::new(
                Arc::clone(&run_metrics),
                Duration::from_secs(self.config.progress_interval_secs),
            );
            tokio::spawn(reporter.run(reporter_stop.clone()))
        });

        let total = queue.total();
        info!(items = total, workers = pool.size(), "dispatch started");

        let mut dispatched = 0;
        while !queue.is_empty() {
            if self.cancel.is_cancelled() {
                warn!(remaining = queue.remaining(), "run cancelled, stopping dispatch");
                break;
            }

            let plan = ChunkPlan {
                index: ledger.chunks.len(),
                size: controller.chunk_size(),
                started_at: Instant::now(),
            };
            let chunk = queue.draw(plan.size);
            let size = chunk.len();
            info!(
                "processing items {}-{} of {} (chunk size: {})",
                dispatched,
                dispatched + size,
                total,
                plan.size
            );

            let chunk_span = start_chunk_span(plan.index, size);
            let reports = pool.run_chunk(chunk).instrument(chunk_span.clone()).await;
            let elapsed = plan.started_at.elapsed();
            dispatched += size;

            let successes = ledger.absorb(reports);
            let adjustment = controller.observe(ChunkSample {
                size,
                successes,
                elapsed,
            });
            run_metrics.publish_control(adjustment.ema, adjustment.chunk_size);
            run_metrics.record_chunk(elapsed);
            record_chunk_outcome(&chunk_span, successes, adjustment.ema);

            let secs = elapsed.as_secs_f64();
            info!(
                "progress: {:.1}% | success rate: {:.2}% | chunk time: {:.2}s | items/sec: {:.1}",
                dispatched as f64 / total as f64 * 100.0,
                adjustment.ema * 100.0,
                secs,
                if secs > 0.0 { size as f64 / secs } else { 0.0 },
            );

            ledger.chunks.push(ChunkRecord {
                index: plan.index,
                size,
                successes,
                elapsed,
                ema: adjustment.ema,
                resize: adjustment.resize,
                next_size: adjustment.chunk_size,
                delay: adjustment.delay,
            });

            if !queue.is_empty() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(adjustment.delay) => {}
                }
            }
        }

        let undispatched = queue.drain_ids();
        run_metrics.record_undispatched(undispatched.len());
        ledger.cancelled.extend(undispatched);

        reporter_stop.cancel();
        if let Some(handle) = reporter {
            let _ = handle.await;
        }
        pool.shutdown().await;

        let report = run_metrics.report();
        info!("completed: {report}");
        ledger.finish(report)
    }
}
