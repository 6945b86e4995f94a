//! Secret handling utilities.
//!
//! Re-exports secrecy types and provides helpers for attaching the service
//! credential to outgoing requests without leaking it into logs.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

use crate::error::{Error, Result};
use reqwest::header::HeaderValue;

/// Build a sensitive header value from a secret.
///
/// The value is flagged sensitive so reqwest redacts it from its `Debug`
/// output.
pub fn sensitive_header(secret: &SecretString) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(secret.expose_secret())
        .map_err(|e| Error::Config(format!("credential is not a valid header value: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}
