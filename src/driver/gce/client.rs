//! GCE Client
//!
//! Authentication plus HTTP, scoped to one project and zone.

use super::auth::TokenSource;
use super::http::GceHttpClient;
use anyhow::{Context, Result};
use serde_json::Value;

pub const DEFAULT_API_BASE: &str = "https://compute.googleapis.com";

#[derive(Clone)]
pub struct GceClient {
    tokens: TokenSource,
    http: GceHttpClient,
    pub project_id: String,
    pub zone: String,
    api_base: String,
}

impl GceClient {
    /// Client using Application Default Credentials
    pub async fn new(project_id: &str, zone: &str) -> Result<Self> {
        let tokens = TokenSource::adc()
            .await
            .context("Failed to initialize GCE credentials")?;
        Self::with_tokens(tokens, project_id, zone)
    }

    pub fn with_tokens(tokens: TokenSource, project_id: &str, zone: &str) -> Result<Self> {
        Ok(Self {
            tokens,
            http: GceHttpClient::new()?,
            project_id: project_id.to_string(),
            zone: zone.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Point at another API endpoint (emulators, tests)
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.tokens.token().await?;
        self.http.get(url, &token).await
    }

    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.tokens.token().await?;
        self.http.post(url, &token, body).await
    }

    pub async fn delete(&self, url: &str) -> Result<Value> {
        let token = self.tokens.token().await?;
        self.http.delete(url, &token).await
    }

    pub fn compute_url(&self, path: &str) -> String {
        format!(
            "{}/compute/v1/projects/{}/{}",
            self.api_base, self.project_id, path
        )
    }

    pub fn compute_zonal_url(&self, resource: &str) -> String {
        self.compute_url(&format!("zones/{}/{}", self.zone, resource))
    }

    pub fn compute_global_url(&self, resource: &str) -> String {
        self.compute_url(&format!("global/{}", resource))
    }
}
