//! HTTP fetch tool
//!
//! Takes a URL from the inputs, fetches it, and returns the body as text
//! capped at `max_chars`. Status codes map onto failure categories so the
//! classifier can decide between retrying and failing.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};

use super::{Tool, truncate_chars};
use crate::domain::FailureCause;
use crate::error::{DoeError, Result};

const DEFAULT_URL_PARAM: &str = "url";
const DEFAULT_MAX_CHARS: usize = 32_000;

/// Fetches a URL given in the inputs
#[derive(Debug, Clone)]
pub struct HttpFetchTool {
    client: reqwest::Client,
    url_param: String,
    max_chars: usize,
}

impl HttpFetchTool {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("doe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DoeError::Tool(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url_param: DEFAULT_URL_PARAM.to_string(),
            max_chars: DEFAULT_MAX_CHARS,
        })
    }

    /// Input field holding the URL
    pub fn with_url_param(mut self, param: impl Into<String>) -> Self {
        self.url_param = param.into();
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

/// Failure for a non-success status, `None` when the status is fine
pub(crate) fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> Option<FailureCause> {
    if status.is_success() {
        return None;
    }
    let message = format!("HTTP {}", status);
    let cause = match status {
        StatusCode::TOO_MANY_REQUESTS => FailureCause::rate_limited(message, retry_after),
        StatusCode::NOT_FOUND | StatusCode::GONE => FailureCause::gone(message),
        s if s.is_client_error() => FailureCause::invalid_input(message),
        s if s.is_server_error() => FailureCause::transient(message),
        _ => FailureCause::unknown(message),
    };
    Some(cause)
}

/// Parse a Retry-After header given in seconds
fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value?.to_str().ok()?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn name(&self) -> &str {
        "http-fetch"
    }

    async fn invoke(&self, inputs: Value) -> std::result::Result<Value, FailureCause> {
        let url = inputs[self.url_param.as_str()]
            .as_str()
            .ok_or_else(|| FailureCause::invalid_input(format!("Missing '{}' parameter", self.url_param)))?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                FailureCause::invalid_input(format!("Bad request for {}: {}", url, e))
            } else {
                FailureCause::transient(format!("Request to {} failed: {}", url, e))
            }
        })?;

        let status = response.status();
        if let Some(cause) = classify_status(status, parse_retry_after(response.headers().get(RETRY_AFTER))) {
            return Err(cause);
        }

        let body = response
            .text()
            .await
            .map_err(|e| FailureCause::transient(format!("Failed to read body: {}", e)))?;
        let (content, truncated) = truncate_chars(&body, self.max_chars);

        Ok(json!({
            "url": url,
            "status": status.as_u16(),
            "content": content,
            "truncated": truncated,
        }))
    }
}
