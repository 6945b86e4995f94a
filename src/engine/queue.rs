//! Item queue: the ordered, deduplicated work for one run.

use crate::model::{ItemId, WorkItem};
use std::collections::VecDeque;
use tracing::warn;

/// Built once per run, drained front to back. Items never re-enter.
#[derive(Debug, Default)]
pub struct ItemQueue {
    items: VecDeque<WorkItem>,
    total: usize,
}

impl ItemQueue {
    /// Sort by identifier and drop repeated identifiers, keeping the first.
    pub fn new(items: impl IntoIterator<Item = WorkItem>) -> Self {
        let mut items: Vec<WorkItem> = items.into_iter().collect();
        // Stable, so the first occurrence of a duplicate sorts first.
        items.sort_by_key(WorkItem::id);

        let before = items.len();
        items.dedup_by_key(|item| item.id());
        let dropped = before - items.len();
        if dropped > 0 {
            warn!(dropped, "duplicate item identifiers dropped from queue");
        }

        let total = items.len();
        Self {
            items: items.into(),
            total,
        }
    }

    /// Remove and return up to `n` items from the front.
    pub fn draw(&mut self, n: usize) -> Vec<WorkItem> {
        let n = n.min(self.items.len());
        self.items.drain(..n).collect()
    }

    /// Identifiers not yet drawn, in queue order.
    pub fn drain_ids(&mut self) -> Vec<ItemId> {
        self.items.drain(..).map(|item| item.id()).collect()
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items the queue started with, after deduplication.
    pub fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_and_dedups_by_id() {
        let mut queue = ItemQueue::new(vec![
            WorkItem::new(ItemId(3), json!({"first": true})),
            WorkItem::etd(ItemId(1)),
            WorkItem::new(ItemId(3), json!({"first": false})),
            WorkItem::etd(ItemId(2)),
        ]);
        assert_eq!(queue.total(), 3);

        let drawn = queue.draw(10);
        let ids: Vec<i64> = drawn.iter().map(|i| i.id().0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(drawn[2].params()["first"], true);
        assert!(queue.is_empty());
    }

    #[test]
    fn draw_takes_at_most_what_remains() {
        let mut queue = ItemQueue::new((1..=5).map(|n| WorkItem::etd(ItemId(n))));
        assert_eq!(queue.draw(2).len(), 2);
        assert_eq!(queue.remaining(), 3);
        assert_eq!(queue.draw(10).len(), 3);
        assert!(queue.draw(1).is_empty());
    }
}
