//! HTTP utilities for Compute Engine REST calls

use anyhow::{Context, Result};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use thiserror::Error;

/// Maximum length of response body to log
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Truncate a response body and strip control characters before logging
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Non-success answer from the API
#[derive(Debug, Error)]
#[error("API request failed: {status}")]
pub struct ApiError {
    pub status: StatusCode,
}

/// Whether `error` is an API 404
pub fn is_not_found(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ApiError>()
        .is_some_and(|e| e.status == StatusCode::NOT_FOUND)
}

#[derive(Clone)]
pub struct GceHttpClient {
    client: Client,
}

impl GceHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cimi-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        self.send(Method::GET, url, token, None).await
    }

    pub async fn post(&self, url: &str, token: &str, body: Option<&Value>) -> Result<Value> {
        self.send(Method::POST, url, token, body).await
    }

    pub async fn delete(&self, url: &str, token: &str) -> Result<Value> {
        self.send(Method::DELETE, url, token, None).await
    }

    async fn send(&self, method: Method, url: &str, token: &str, body: Option<&Value>) -> Result<Value> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.context("Failed to send request")?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(ApiError { status }.into());
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}
