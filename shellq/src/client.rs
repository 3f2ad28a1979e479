//! Blocking client for the engine's control endpoint.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

use crate::exit_codes;

/// Default control endpoint, overridable with `--api-url` / `SHELLQ_API_URL`.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot reach {url}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("build http client")]
    Client(#[source] reqwest::Error),
}

impl ClientError {
    /// Exit code for `shellq cancel`. Without a reply the endpoint counts as
    /// unreachable, including when no HTTP client could be built.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::Unreachable { .. } | ClientError::Client(_) => exit_codes::UNREACHABLE,
        }
    }
}

/// What the engine said to a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReply {
    /// 2xx: the response body (JSON if it parsed, else a string).
    Accepted(Value),
    /// Any other status.
    Rejected { status: u16 },
}

impl CancelReply {
    /// JSON printed by `shellq cancel`.
    pub fn to_json(&self) -> Value {
        match self {
            CancelReply::Accepted(body) => body.clone(),
            CancelReply::Rejected { status } => json!({
                "error": "Failed to cancel job",
                "status_code": status,
            }),
        }
    }
}

/// POST `<api_url>/cancel`.
pub fn request_cancel(api_url: &str) -> Result<CancelReply, ClientError> {
    let url = format!("{}/cancel", api_url.trim_end_matches('/'));
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(ClientError::Client)?;
    let response = client
        .post(&url)
        .send()
        .map_err(|source| ClientError::Unreachable {
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Ok(CancelReply::Rejected {
            status: status.as_u16(),
        });
    }
    let text = response.text().unwrap_or_default();
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Ok(CancelReply::Accepted(body))
}
