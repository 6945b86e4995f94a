//! End-to-end dispatcher runs against a scripted margin service.

mod common;

use common::{Reply, ScriptedService, items, test_config, transient};
use margin_dispatch::config::{DispatchConfig, RetryConfig};
use margin_dispatch::engine::{Dispatcher, Resize};
use margin_dispatch::model::ItemId;
use std::sync::Arc;
use std::time::Duration;

fn dispatcher(service: &Arc<ScriptedService>) -> Dispatcher<ScriptedService> {
    Dispatcher::new(Arc::clone(service), test_config()).unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn ten_items_one_transient_one_structural() {
    let service = Arc::new(
        ScriptedService::new()
            .script(9, [transient(), Reply::Margin(900.0)])
            .script(10, [Reply::Structural]),
    );
    let outcome = dispatcher(&service).run(items(1..=10)).await;

    assert_eq!(outcome.results.len(), 9);
    assert_eq!(outcome.failures.len(), 1);
    assert!(outcome.cancelled.is_empty());

    let ids: Vec<ItemId> = outcome.results.iter().map(|r| r.id).collect();
    assert_eq!(ids, (1..=9).map(ItemId).collect::<Vec<_>>());
    assert_eq!(outcome.failures[0].id, ItemId(10));
    assert_eq!(outcome.failures[0].attempts, 1);

    assert_eq!(outcome.attempts[&ItemId(9)], 2);
    assert_eq!(outcome.attempts[&ItemId(10)], 1);
    assert!((1..=8).all(|id| outcome.attempts[&ItemId(id)] == 1));

    assert_eq!(outcome.chunks.len(), 1);
    assert_eq!(outcome.chunks[0].size, 10);
    assert_eq!(outcome.chunks[0].successes, 9);

    let report = &outcome.report;
    assert_eq!(report.total_items, 10);
    assert_eq!(report.succeeded, 9);
    assert_eq!(report.failed, 1);
    assert_eq!(report.attempts, 11);
    assert_eq!(report.success_ratio, Some(0.9));
}

#[tokio::test(start_paused = true)]
async fn empty_input_dispatches_nothing() {
    let service = Arc::new(ScriptedService::new());
    let outcome = dispatcher(&service).run(Vec::new()).await;

    assert!(outcome.results.is_empty());
    assert!(outcome.failures.is_empty());
    assert!(outcome.chunks.is_empty());
    assert_eq!(outcome.report.total_items, 0);
    assert_eq!(outcome.report.success_ratio, None);
    assert_eq!(service.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_ids_are_dispatched_once() {
    let service = Arc::new(ScriptedService::new());
    let outcome = dispatcher(&service).run(items([3, 1, 2, 2, 3])).await;

    assert_eq!(outcome.report.total_items, 3);
    assert_eq!(outcome.results.len(), 3);
    assert_eq!(service.calls(2), 1);
    assert_eq!(service.calls(3), 1);
}

// ---------------------------------------------------------------------------
// Accounting invariants
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn every_item_ends_in_exactly_one_list() {
    let mut service = ScriptedService::new();
    for id in 1..=400i64 {
        service = match id % 7 {
            0 => service.script(id, [Reply::Structural]),
            1 => service.script(id, [transient()]),
            2 => service.script(id, [transient(), transient(), Reply::Margin(1.0)]),
            3 => service.script(id, [transient(), Reply::Margin(1.0)]),
            _ => service,
        };
    }
    let service = Arc::new(service);
    let outcome = dispatcher(&service).run(items(1..=400)).await;

    assert_eq!(outcome.results.len() + outcome.failures.len(), 400);
    assert!(outcome.cancelled.is_empty());
    assert_eq!(outcome.attempts.len(), 400);
    assert!(outcome.attempts.values().all(|&n| (1..=3).contains(&n)));
    assert_eq!(
        outcome.attempts.values().map(|&n| u64::from(n)).sum::<u64>(),
        outcome.report.attempts
    );
    assert_eq!(u64::from(service.total_calls()), outcome.report.attempts);

    let sizes: usize = outcome.chunks.iter().map(|c| c.size).sum();
    assert_eq!(sizes, 400);
    for chunk in &outcome.chunks {
        assert!((50..=200).contains(&chunk.next_size));
        assert!((0.0..=1.0).contains(&chunk.ema));
    }
}

#[tokio::test(start_paused = true)]
async fn fast_healthy_run_grows_chunks() {
    let service = Arc::new(ScriptedService::new());
    let outcome = dispatcher(&service).run(items(1..=250)).await;

    let sizes: Vec<usize> = outcome.chunks.iter().map(|c| c.size).collect();
    assert_eq!(sizes, vec![100, 120, 30]);
    assert!(outcome.chunks.iter().all(|c| c.resize == Resize::Grow));
    assert_eq!(outcome.chunks[2].next_size, 172);
    assert_eq!(outcome.report.final_ema, 1.0);
}

#[tokio::test(start_paused = true)]
async fn no_item_exceeds_max_attempts() {
    let mut service = ScriptedService::new();
    for id in 1..=20 {
        service = service.script(id, [transient()]);
    }
    let service = Arc::new(service);
    let config = DispatchConfig {
        retry: RetryConfig {
            max_attempts: 2,
            base_delay_ms: 5,
            max_delay_ms: 5,
        },
        ..test_config()
    };
    let outcome = Dispatcher::new(Arc::clone(&service), config)
        .unwrap()
        .run(items(1..=20))
        .await;

    assert_eq!(outcome.failures.len(), 20);
    assert!(outcome.failures.iter().all(|f| f.attempts == 2));
    assert_eq!(service.total_calls(), 40);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_reports_every_item_cancelled() {
    let service = Arc::new(ScriptedService::new());
    let dispatcher = dispatcher(&service);
    dispatcher.cancellation_token().cancel();

    let outcome = dispatcher.run(items(1..=25)).await;

    assert!(outcome.results.is_empty());
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.cancelled.len(), 25);
    assert!(outcome.chunks.is_empty());
    assert_eq!(outcome.report.cancelled, 25);
    assert_eq!(service.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_run_accounts_for_every_item() {
    let service = Arc::new(ScriptedService::new().latency(Duration::from_secs(1)));
    let dispatcher = dispatcher(&service);
    let cancel = dispatcher.cancellation_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        cancel.cancel();
    });
    let outcome = dispatcher.run(items(1..=300)).await;

    let accounted = outcome.results.len() + outcome.failures.len() + outcome.cancelled.len();
    assert_eq!(accounted, 300);
    assert_eq!(outcome.results.len(), 4);
    assert!(outcome.failures.is_empty());
    assert!(u64::from(service.total_calls()) < 300);
    assert_eq!(outcome.report.cancelled, 296);
    let per_item: u64 = outcome.attempts.values().map(|&a| u64::from(a)).sum();
    assert_eq!(per_item, outcome.report.attempts);
}
