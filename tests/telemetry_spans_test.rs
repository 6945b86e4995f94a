//! Dispatch span fields and nesting, captured through a test layer.
//!
//! Each test installs its subscriber with `set_default` on a current-thread
//! runtime, so worker tasks spawned by the dispatcher report to it as well.

mod common;

use common::{Reply, ScriptedService, items, test_config};
use margin_dispatch::engine::Dispatcher;
use margin_dispatch::model::ItemId;
use margin_dispatch::telemetry::dispatch;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt as _};
use tracing_subscriber::registry::LookupSpan;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Capture layer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ClosedSpan {
    name: &'static str,
    parent: Option<&'static str>,
    fields: HashMap<&'static str, String>,
}

impl ClosedSpan {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

struct FieldValues(HashMap<&'static str, String>);

impl Visit for FieldValues {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name(), value.to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name(), format!("{value:?}"));
    }
}

/// Collects every span with its parent's name and final field values.
#[derive(Clone, Default)]
struct SpanCapture {
    closed: Arc<Mutex<Vec<ClosedSpan>>>,
}

impl SpanCapture {
    fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    fn named(&self, name: &str) -> Vec<ClosedSpan> {
        self.closed
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }
}

impl<S> Layer<S> for SpanCapture
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut values = FieldValues(HashMap::new());
        attrs.record(&mut values);
        span.extensions_mut().insert(values);
    }

    fn on_record(&self, id: &Id, record: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        if let Some(values) = span.extensions_mut().get_mut::<FieldValues>() {
            record.record(values);
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else { return };
        let fields = span
            .extensions_mut()
            .remove::<FieldValues>()
            .map(|v| v.0)
            .unwrap_or_default();
        self.closed.lock().unwrap().push(ClosedSpan {
            name: span.name(),
            parent: span.parent().map(|p| p.name()),
            fields,
        });
    }
}

// ---------------------------------------------------------------------------
// Span helpers
// ---------------------------------------------------------------------------

#[test]
fn chunk_span_records_barrier_outcome_under_its_run() {
    let capture = SpanCapture::default();
    let _guard = capture.install();

    {
        let run = dispatch::start_run_span(&Uuid::new_v4(), 250);
        let _entered = run.enter();
        let chunk = dispatch::start_chunk_span(0, 100);
        dispatch::record_chunk_outcome(&chunk, 97, 0.991);
    }

    let runs = capture.named("dispatch.run");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].field("run.items"), Some("250"));

    let chunks = capture.named("dispatch.chunk");
    assert_eq!(chunks.len(), 1);
    let chunk = &chunks[0];
    assert_eq!(chunk.parent, Some("dispatch.run"));
    assert_eq!(chunk.field("chunk.index"), Some("0"));
    assert_eq!(chunk.field("chunk.size"), Some("100"));
    assert_eq!(chunk.field("chunk.successes"), Some("97"));
    assert_eq!(chunk.field("chunk.ema"), Some("0.991"));
}

#[test]
fn item_span_records_disposition() {
    let capture = SpanCapture::default();
    let _guard = capture.install();

    {
        let span = dispatch::start_item_span(ItemId(7));
        dispatch::record_item_disposition(&span, 2, "succeeded");
    }

    let spans = capture.named("dispatch.item");
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].parent, None);
    assert_eq!(spans[0].field("item.id"), Some("7"));
    assert_eq!(spans[0].field("item.attempts"), Some("2"));
    assert_eq!(spans[0].field("item.disposition"), Some("succeeded"));
}

// ---------------------------------------------------------------------------
// Dispatcher runs
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dispatcher_nests_item_spans_under_their_chunk() {
    let capture = SpanCapture::default();
    let _guard = capture.install();

    let service = Arc::new(ScriptedService::new().script(3, [Reply::Structural]));
    let outcome = Dispatcher::new(Arc::clone(&service), test_config())
        .unwrap()
        .run(items(1..=5))
        .await;
    assert_eq!(outcome.results.len(), 4);

    let runs = capture.named("dispatch.run");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].field("run.items"), Some("5"));

    let chunks = capture.named("dispatch.chunk");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].parent, Some("dispatch.run"));
    assert_eq!(chunks[0].field("chunk.successes"), Some("4"));

    let item_spans = capture.named("dispatch.item");
    assert_eq!(item_spans.len(), 5);
    assert!(item_spans.iter().all(|s| s.parent == Some("dispatch.chunk")));

    let failed = item_spans
        .iter()
        .find(|s| s.field("item.id") == Some("3"))
        .unwrap();
    assert_eq!(failed.field("item.attempts"), Some("1"));
    assert_eq!(failed.field("item.disposition"), Some("failed"));
    assert!(
        item_spans
            .iter()
            .filter(|s| s.field("item.id") != Some("3"))
            .all(|s| s.field("item.disposition") == Some("succeeded"))
    );
}
