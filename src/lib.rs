//! # margin-dispatch
//!
//! Adaptive parallel batch dispatcher for margin estimates.
//!
//! Fans a list of instruments out to a remote margin estimator through a
//! long-lived worker pool, sizing each chunk from a smoothed success rate
//! and chunk latency. Transient failures retry with linear backoff;
//! permanent ones are recorded, never dropped. Results are joined with
//! catalog metadata and stored via a [`sink::ResultSink`] (tab-separated
//! file, Postgres upsert).

pub mod client;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod sink;
pub mod telemetry;

pub use client::{CallError, CatalogSource, MarginService, PrismaClient};
pub use config::{Config, DispatchConfig, RetryConfig};
pub use engine::{Dispatcher, RunOutcome, RunReport};
pub use error::{Error, Result};
pub use model::{ItemId, ItemOutcome, ItemResult, WorkItem};
