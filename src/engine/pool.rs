//! Long-lived bounded worker pool, reused across chunks.
//!
//! Jobs travel over a bounded channel; each carries a oneshot for its
//! report. A chunk's barrier is simply awaiting every reply it sent.

use crate::client::MarginService;
use crate::engine::executor::RequestExecutor;
use crate::model::{Disposition, ItemReport, WorkItem};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error};

struct Job {
    item: WorkItem,
    reply: oneshot::Sender<ItemReport>,
    /// Chunk span the item runs under.
    span: Span,
}

pub struct WorkerPool<S> {
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    executor: Arc<RequestExecutor<S>>,
}

impl<S: MarginService> WorkerPool<S> {
    /// Spawn `size` workers sharing one executor.
    pub fn spawn(executor: Arc<RequestExecutor<S>>, size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Job>(size);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let executor = Arc::clone(&executor);
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only while waiting for the next job.
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else { break };
                        let report = executor.execute(&job.item).instrument(job.span).await;
                        // The dispatcher may have stopped listening; nothing to do then.
                        let _ = job.reply.send(report);
                    }
                    debug!(worker, "worker stopped");
                })
            })
            .collect();

        Self {
            tx,
            workers,
            executor,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Run every item in the chunk and wait for all of them.
    ///
    /// Items run under the caller's current span. Reports come back in
    /// dispatch order. An item whose worker vanished
    /// (panic or shutdown) is reported as failed, never dropped.
    pub async fn run_chunk(&self, items: Vec<WorkItem>) -> Vec<ItemReport> {
        let mut pending = Vec::with_capacity(items.len());

        for item in items {
            let id = item.id();
            let (reply, rx) = oneshot::channel();
            let job = Job {
                item,
                reply,
                span: Span::current(),
            };
            if self.tx.send(job).await.is_err() {
                error!(%id, "worker pool closed before dispatch");
            }
            pending.push((id, rx));
        }

        join_all(pending.into_iter().map(|(id, rx)| async move {
            match rx.await {
                Ok(report) => report,
                Err(_) => {
                    error!(%id, "worker dropped item without reporting");
                    let disposition = Disposition::Failed("worker dropped the item".into());
                    self.executor.metrics().record_disposition(&disposition);
                    ItemReport {
                        id,
                        attempts: 0,
                        disposition,
                    }
                }
            }
        }))
        .await
    }

    /// Close the channel and wait for workers to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!("worker task ended abnormally: {e}");
            }
        }
    }
}
