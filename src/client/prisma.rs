//! HTTP client for the margin estimator API.

use super::{CallError, CatalogSource, MarginService};
use crate::config::DispatchConfig;
use crate::config::secrets::sensitive_header;
use crate::error::{Error, Result};
use crate::model::SeriesRecord;
use reqwest::header::HeaderMap;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

/// Header carrying the API credential.
const API_KEY_HEADER: &str = "X-DBP-APIKEY";

/// Longest response excerpt kept in error reasons.
const BODY_EXCERPT: usize = 200;

/// Client for the estimator API. Owns the pooled HTTP connections; cheap to
/// share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct PrismaClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SeriesResponse {
    list_series: Vec<serde_json::Value>,
}

impl PrismaClient {
    /// Build a client with the credential attached to every request.
    ///
    /// The connection pool is sized by `pool_max_idle_per_host`, independent
    /// of how many workers share the client.
    pub fn new(
        api_key: &SecretString,
        base_url: impl Into<String>,
        settings: &DispatchConfig,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, sensitive_header(api_key)?);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.call_timeout())
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .build()?;

        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl MarginService for PrismaClient {
    async fn estimate(
        &self,
        params: &serde_json::Value,
    ) -> std::result::Result<serde_json::Value, CallError> {
        let response = self
            .http
            .post(self.endpoint("estimator"))
            .json(&estimator_request(params))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        if !status.is_success() {
            return Err(CallError::Status {
                status: status.as_u16(),
                body: excerpt(&body).to_string(),
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            CallError::Malformed(format!("{e}; body starts {:?}", excerpt(&body)))
        })
    }
}

impl CatalogSource for PrismaClient {
    async fn fetch_series(&self, product: &str) -> Result<Vec<SeriesRecord>> {
        info!(product, "fetching series catalog");

        let response = self
            .http
            .get(self.endpoint("series"))
            .query(&[("products", product)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!(product, "series request failed: {e}");
                Error::Catalog(e.to_string())
            })?;

        let parsed: SeriesResponse = response.json().await.map_err(|e| {
            error!(product, "series response undecodable: {e}");
            Error::Catalog(format!("undecodable series response: {e}"))
        })?;

        let series = decode_series(parsed.list_series);
        debug!(product, count = series.len(), "series catalog received");
        Ok(series)
    }
}

/// Request body for one ETD position, in clearing currency EUR.
pub fn estimator_request(params: &serde_json::Value) -> serde_json::Value {
    json!({
        "portfolio_components": [
            { "type": "etd_portfolio", "etd_portfolio": [params] }
        ],
        "clearing_currency": "EUR",
    })
}

/// Decode catalog entries one by one. An entry without a usable `iid` is
/// logged and left out; it never fails the whole catalog.
fn decode_series(entries: Vec<serde_json::Value>) -> Vec<SeriesRecord> {
    let total = entries.len();
    let series: Vec<SeriesRecord> = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("skipping undecodable series entry: {e}");
                None
            }
        })
        .collect();
    if series.len() < total {
        warn!(skipped = total - series.len(), "series entries skipped");
    }
    series
}

fn classify(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::Timeout
    } else {
        CallError::Transport(e.to_string())
    }
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(BODY_EXCERPT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
