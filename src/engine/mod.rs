//! Dispatch engine: item queue, request executor, admission controller,
//! worker pool and run orchestration.

pub mod admission;
pub mod dispatch;
pub mod executor;
pub mod pool;
pub mod progress;
pub mod queue;

pub use admission::{AdmissionConfig, AdmissionController, Adjustment, ChunkSample, Resize};
pub use dispatch::{ChunkRecord, Dispatcher, RunOutcome};
pub use executor::RequestExecutor;
pub use pool::WorkerPool;
pub use progress::{ProgressSnapshot, RunMetrics, RunReport};
pub use queue::ItemQueue;
