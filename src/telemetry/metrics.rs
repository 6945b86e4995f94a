//! Dispatch instruments.
//!
//! Built once per run from the globally-registered `MeterProvider`, so
//! telemetry must be initialized before the dispatcher starts for them to
//! export anything.

use super::SERVICE_NAME;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram};
use std::fmt;
use std::time::Duration;

pub struct DispatchInstruments {
    /// `dispatch.attempts`, labelled by `outcome`
    /// ("success" | "transport" | "timeout" | "status" | "malformed" |
    /// "structural" | "cancelled").
    attempts: Counter<u64>,
    /// `dispatch.items`, labelled by `disposition`
    /// ("succeeded" | "failed" | "cancelled").
    items: Counter<u64>,
    chunk_duration_ms: Histogram<f64>,
    chunk_size: Gauge<u64>,
}

impl DispatchInstruments {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter(SERVICE_NAME);
        Self {
            attempts: meter
                .u64_counter("dispatch.attempts")
                .with_description("Remote estimator calls issued")
                .build(),
            items: meter
                .u64_counter("dispatch.items")
                .with_description("Work items reaching a terminal state")
                .build(),
            chunk_duration_ms: meter
                .f64_histogram("dispatch.chunk.duration_ms")
                .with_description("Chunk wall time from dispatch to barrier")
                .with_unit("ms")
                .build(),
            chunk_size: meter
                .u64_gauge("dispatch.chunk.size")
                .with_description("Admission controller chunk size")
                .build(),
        }
    }

    pub fn attempt(&self, outcome: &'static str) {
        self.attempts.add(1, &[KeyValue::new("outcome", outcome)]);
    }

    pub fn items(&self, disposition: &'static str, count: u64) {
        self.items.add(count, &[KeyValue::new("disposition", disposition)]);
    }

    pub fn chunk_finished(&self, elapsed: Duration) {
        self.chunk_duration_ms.record(elapsed.as_secs_f64() * 1000.0, &[]);
    }

    /// Size chosen for the next chunk.
    pub fn chunk_size(&self, size: usize) {
        self.chunk_size.record(size as u64, &[]);
    }
}

impl Default for DispatchInstruments {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DispatchInstruments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchInstruments").finish_non_exhaustive()
    }
}
