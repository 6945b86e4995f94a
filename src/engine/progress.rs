//! Run-wide counters, progress snapshots and the final run report.
//!
//! Workers bump the counters concurrently through atomics. The admission
//! controller's signal (EMA and chunk size) is published here after each
//! chunk barrier so observers never see a half-updated value.

use crate::model::Disposition;
use crate::telemetry::metrics::DispatchInstruments;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Shared counters for one run.
#[derive(Debug)]
pub struct RunMetrics {
    total_items: u64,
    started_at: Instant,

    /// Remote calls issued, across all items and retries.
    attempts_total: AtomicU64,
    /// Calls that produced a result.
    successes_total: AtomicU64,

    items_succeeded: AtomicU64,
    items_failed: AtomicU64,
    items_cancelled: AtomicU64,

    /// `f64` bits of the controller's smoothed success rate.
    ema_bits: AtomicU64,
    chunk_size: AtomicUsize,

    instruments: DispatchInstruments,
}

impl RunMetrics {
    pub fn new(total_items: usize, initial_chunk_size: usize) -> Arc<Self> {
        Arc::new(Self {
            total_items: total_items as u64,
            started_at: Instant::now(),
            attempts_total: AtomicU64::new(0),
            successes_total: AtomicU64::new(0),
            items_succeeded: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            items_cancelled: AtomicU64::new(0),
            ema_bits: AtomicU64::new(1.0_f64.to_bits()),
            chunk_size: AtomicUsize::new(initial_chunk_size),
            instruments: DispatchInstruments::new(),
        })
    }

    /// Record one remote call and how it was classified.
    pub fn record_attempt(&self, outcome: &'static str) {
        self.attempts_total.fetch_add(1, Ordering::Relaxed);
        if outcome == "success" {
            self.successes_total.fetch_add(1, Ordering::Relaxed);
        }
        self.instruments.attempt(outcome);
    }

    /// Record an item reaching its terminal state.
    pub fn record_disposition(&self, disposition: &Disposition) {
        let counter = match disposition {
            Disposition::Succeeded(_) => &self.items_succeeded,
            Disposition::Failed(_) => &self.items_failed,
            Disposition::Cancelled => &self.items_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.instruments.items(disposition.label(), 1);
    }

    /// Record items that were never dispatched because the run was cancelled.
    pub fn record_undispatched(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.items_cancelled.fetch_add(count as u64, Ordering::Relaxed);
        self.instruments.items("cancelled", count as u64);
    }

    /// Publish the controller's state after a chunk barrier.
    pub fn publish_control(&self, ema: f64, chunk_size: usize) {
        self.ema_bits.store(ema.to_bits(), Ordering::Release);
        self.chunk_size.store(chunk_size, Ordering::Release);
        self.instruments.chunk_size(chunk_size);
    }

    /// Record the wall time of a finished chunk.
    pub fn record_chunk(&self, elapsed: Duration) {
        self.instruments.chunk_finished(elapsed);
    }

    pub fn attempts_total(&self) -> u64 {
        self.attempts_total.load(Ordering::Relaxed)
    }

    pub fn successes_total(&self) -> u64 {
        self.successes_total.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let succeeded = self.items_succeeded.load(Ordering::Relaxed);
        let failed = self.items_failed.load(Ordering::Relaxed);
        let cancelled = self.items_cancelled.load(Ordering::Relaxed);
        let processed = succeeded + failed + cancelled;
        let elapsed = self.elapsed();

        ProgressSnapshot {
            total_items: self.total_items,
            processed,
            succeeded,
            failed,
            attempts: self.attempts_total(),
            successes: self.successes_total(),
            ema: f64::from_bits(self.ema_bits.load(Ordering::Acquire)),
            chunk_size: self.chunk_size.load(Ordering::Acquire),
            elapsed,
            percent_complete: percent(processed, self.total_items),
            items_per_sec: rate(processed, elapsed),
        }
    }

    /// Final accounting once the run has ended.
    pub fn report(&self) -> RunReport {
        let snap = self.snapshot();
        let cancelled = snap.processed - snap.succeeded - snap.failed;
        let finished = snap.succeeded + snap.failed;

        RunReport {
            total_items: snap.total_items,
            succeeded: snap.succeeded,
            failed: snap.failed,
            cancelled,
            attempts: snap.attempts,
            elapsed: snap.elapsed,
            items_per_sec: rate(finished, snap.elapsed),
            success_ratio: (finished > 0).then(|| snap.succeeded as f64 / finished as f64),
            final_ema: snap.ema,
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        100.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// Point-in-time view of a run, for observers.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub total_items: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub attempts: u64,
    pub successes: u64,
    pub ema: f64,
    pub chunk_size: usize,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub percent_complete: f64,
    pub items_per_sec: f64,
}

impl std::fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:.1}%] {}/{} items | ok {} failed {} | attempts {} | ema {:.2}% | chunk {} | {:.1} items/s",
            self.percent_complete,
            self.processed,
            self.total_items,
            self.succeeded,
            self.failed,
            self.attempts,
            self.ema * 100.0,
            self.chunk_size,
            self.items_per_sec,
        )
    }
}

/// Final run accounting.
///
/// `success_ratio` is cumulative over every finished item; `final_ema` is
/// the controller's smoothed per-chunk signal. They answer different
/// questions and are reported side by side.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub total_items: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub attempts: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub items_per_sec: f64,
    /// `None` when no item finished.
    pub success_ratio: Option<f64>,
    pub final_ema: f64,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ratio = match self.success_ratio {
            Some(r) => format!("{:.2}%", r * 100.0),
            None => "n/a".to_string(),
        };
        write!(
            f,
            "{} items in {:.1}s | {:.1} items/s | succeeded {} failed {} cancelled {} | \
             attempts {} | success ratio {} | final ema {:.2}%",
            self.total_items,
            self.elapsed.as_secs_f64(),
            self.items_per_sec,
            self.succeeded,
            self.failed,
            self.cancelled,
            self.attempts,
            ratio,
            self.final_ema * 100.0,
        )
    }
}

/// Logs a progress snapshot at a fixed interval until stopped.
pub struct ProgressReporter {
    metrics: Arc<RunMetrics>,
    interval: Duration,
}

impl ProgressReporter {
    pub fn new(metrics: Arc<RunMetrics>, interval: Duration) -> Self {
        Self { metrics, interval }
    }

    pub async fn run(self, stop: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    tracing::info!("{}", self.metrics.snapshot());
                }
            }
        }
    }
}
