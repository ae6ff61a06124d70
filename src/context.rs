//! Execution context
//!
//! One [`Context`] per inbound request: who is calling, which driver serves
//! the request, how canonical URLs are built, and how far reference
//! resolution may recurse. Nothing in here outlives the request.

use anyhow::{Context as _, Result as AnyResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::driver::{Credentials, Driver};
use crate::engine::Engine;
use crate::error::{CimiError, Result};
use crate::resource::capability;

/// Canonical URL construction for resources, collections and actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlBuilder {
    base: String,
}

impl UrlBuilder {
    pub fn new(base_url: &str) -> AnyResult<Self> {
        let parsed = url::Url::parse(base_url)
            .with_context(|| format!("Invalid base URL: {}", base_url))?;
        if parsed.cannot_be_a_base() {
            return Err(anyhow::anyhow!("Base URL cannot carry paths: {}", base_url));
        }

        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn collection_url(&self, collection: &str) -> String {
        format!("{}/{}", self.base, collection)
    }

    pub fn resource_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base, collection, urlencoding::encode(id))
    }

    /// URL of a collection owned by a resource (e.g. a machine's disks)
    pub fn sub_collection_url(&self, collection: &str, id: &str, sub_collection: &str) -> String {
        format!("{}/{}", self.resource_url(collection, id), sub_collection)
    }

    pub fn action_url(&self, collection: &str, id: &str, action: &str) -> String {
        format!("{}/{}", self.resource_url(collection, id), action)
    }
}

/// Per-request state
#[derive(Clone)]
pub struct Context {
    request_id: Uuid,
    credentials: Credentials,
    driver: Arc<dyn Driver>,
    engine: Arc<Engine>,
    urls: UrlBuilder,
    depth: usize,
    max_depth: usize,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new(engine: Arc<Engine>, driver: Arc<dyn Driver>, credentials: Credentials) -> Self {
        let settings = engine.settings();
        let urls = settings.urls.clone();
        let max_depth = settings.max_reference_depth;
        let deadline = settings.request_timeout.map(|t| Instant::now() + t);

        Self {
            request_id: Uuid::new_v4(),
            credentials,
            driver,
            engine,
            urls,
            depth: 0,
            max_depth,
            cancel: CancellationToken::new(),
            deadline,
        }
    }

    /// Abort in-flight backend calls when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn urls(&self) -> &UrlBuilder {
        &self.urls
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the active driver implements `operation`
    pub fn supports(&self, operation: &str) -> bool {
        capability::supports(self.driver(), operation)
    }

    /// Context one resolution level deeper, or `None` past the depth bound
    pub fn nested(&self) -> Option<Context> {
        if self.depth >= self.max_depth {
            return None;
        }
        let mut nested = self.clone();
        nested.depth += 1;
        Some(nested)
    }

    /// Call the driver, racing request cancellation and the deadline
    pub async fn invoke(&self, method: &str, params: Value) -> Result<Value> {
        if self.is_cancelled() {
            return Err(CimiError::Cancelled);
        }

        tracing::debug!(
            "invoke: request={}, driver={}, method={}, depth={}",
            self.request_id,
            self.driver.name(),
            method,
            self.depth
        );

        let call = self.driver.invoke(&self.credentials, method, &params);
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::info!("Request {} cancelled during {}", self.request_id, method);
                Err(CimiError::Cancelled)
            },
            _ = deadline => Err(CimiError::Timeout {
                operation: method.to_string(),
            }),
            result = call => result.map_err(|e| CimiError::backend(method, &e)),
        }
    }

    pub fn collection_url(&self, collection: &str) -> String {
        self.urls.collection_url(collection)
    }

    pub fn resource_url(&self, collection: &str, id: &str) -> String {
        self.urls.resource_url(collection, id)
    }

    pub fn sub_collection_url(&self, collection: &str, id: &str, sub_collection: &str) -> String {
        self.urls.sub_collection_url(collection, id, sub_collection)
    }

    pub fn action_url(&self, collection: &str, id: &str, action: &str) -> String {
        self.urls.action_url(collection, id, action)
    }
}
