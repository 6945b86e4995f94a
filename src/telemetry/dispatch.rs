//! Dispatch span helpers.
//!
//! One span per run, one per chunk, one per item. Outcome fields are declared
//! empty and filled in when the corresponding barrier or item resolves.

use crate::model::ItemId;
use tracing::Span;
use uuid::Uuid;

/// Start the span covering a whole dispatcher run.
pub fn start_run_span(run_id: &Uuid, items: usize) -> Span {
    tracing::info_span!(
        "dispatch.run",
        "run.id" = %run_id,
        "run.items" = items,
    )
}

/// Start a span for one chunk.
///
/// `chunk.successes` and `chunk.ema` are recorded at the barrier via
/// [`record_chunk_outcome`].
pub fn start_chunk_span(index: usize, size: usize) -> Span {
    tracing::info_span!(
        "dispatch.chunk",
        "chunk.index" = index,
        "chunk.size" = size,
        "chunk.successes" = tracing::field::Empty,
        "chunk.ema" = tracing::field::Empty,
    )
}

/// Record the barrier outcome on a chunk span.
pub fn record_chunk_outcome(span: &Span, successes: usize, ema: f64) {
    span.record("chunk.successes", successes);
    span.record("chunk.ema", ema);
}

/// Start a span for one item's attempts.
pub fn start_item_span(id: ItemId) -> Span {
    tracing::debug_span!(
        "dispatch.item",
        "item.id" = id.0,
        "item.attempts" = tracing::field::Empty,
        "item.disposition" = tracing::field::Empty,
    )
}

/// Record how an item ended on its span.
pub fn record_item_disposition(span: &Span, attempts: u32, disposition: &str) {
    span.record("item.attempts", attempts);
    span.record("item.disposition", disposition);
}
