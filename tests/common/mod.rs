//! Scripted in-process margin service shared by the dispatch tests.
#![allow(dead_code)]

use margin_dispatch::client::{CallError, MarginService};
use margin_dispatch::config::{DispatchConfig, RetryConfig};
use margin_dispatch::model::{ItemId, WorkItem};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Well-formed estimator body with the given initial margin.
    Margin(f64),
    /// Decodable body without the margin fields.
    Structural,
    /// Call error; every variant is transient.
    Fail(CallError),
    /// Never answers; only a timeout or cancellation ends the call.
    Hang,
}

/// Replies per instrument id, consumed in order. The last reply repeats.
/// Ids without a script succeed on every call.
#[derive(Default)]
pub struct ScriptedService {
    scripts: HashMap<i64, Vec<Reply>>,
    latency: Duration,
    calls: Mutex<HashMap<i64, u32>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, iid: i64, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.scripts.insert(iid, replies.into_iter().collect());
        self
    }

    /// Simulated latency of every call.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Calls received for one id.
    pub fn calls(&self, iid: i64) -> u32 {
        self.calls.lock().unwrap().get(&iid).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    fn next_reply(&self, iid: i64) -> Reply {
        let mut calls = self.calls.lock().unwrap();
        let n = calls.entry(iid).or_default();
        *n += 1;
        match self.scripts.get(&iid) {
            Some(script) if !script.is_empty() => {
                let idx = (*n as usize - 1).min(script.len() - 1);
                script[idx].clone()
            }
            _ => Reply::Margin(100.0 + iid as f64),
        }
    }
}

impl MarginService for ScriptedService {
    async fn estimate(&self, params: &Value) -> Result<Value, CallError> {
        let iid = params["iid"].as_i64().unwrap_or_default();
        let reply = self.next_reply(iid);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match reply {
            Reply::Margin(initial) => Ok(margin_body(initial, initial - 10.0, 10.0)),
            Reply::Structural => Ok(json!({ "portfolio_margin": [], "drilldowns": [] })),
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Estimator response carrying the three margin fields.
pub fn margin_body(initial: f64, component: f64, premium: f64) -> Value {
    json!({
        "portfolio_margin": [{ "initial_margin": initial }],
        "drilldowns": [{ "component_margin": component, "premium_margin": premium }],
    })
}

pub fn transient() -> Reply {
    Reply::Fail(CallError::Status {
        status: 503,
        body: "service unavailable".into(),
    })
}

pub fn items(ids: impl IntoIterator<Item = i64>) -> Vec<WorkItem> {
    ids.into_iter().map(|id| WorkItem::etd(ItemId(id))).collect()
}

/// Fast retries and no progress reporter.
pub fn test_config() -> DispatchConfig {
    DispatchConfig {
        max_concurrency: 4,
        progress_interval_secs: 0,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
        },
        ..DispatchConfig::default()
    }
}
