//! Backend drivers
//!
//! A driver is the pluggable adapter in front of one infrastructure
//! provider. The engine only ever talks to it through [`Driver::invoke`],
//! keyed by operation name, and checks operation presence through the
//! [`OperationSet`] the driver publishes.
//!
//! # Conventions
//!
//! - lookup operations (`instance`, `network`, ...) take `{"id": ...}` and
//!   return `null` when the target does not exist
//! - list operations (`instances`, `networks`, ...) return an array
//! - action operations (`start_instance`, ...) take `{"id": ...}` and return a
//!   boolean-like value; `false`/`null` means the backend declined
//! - returned objects follow the shapes in [`crate::domain`]

pub mod gce;
pub mod mock;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;

pub use gce::GceDriver;
pub use mock::MockDriver;

/// Per-request credentials handed to the driver untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            password: Some(password.into()),
        }
    }
}

/// Operation names a driver implements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationSet(BTreeSet<String>);

impl OperationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.0.contains(operation)
    }

    pub fn insert(&mut self, operation: impl Into<String>) {
        self.0.insert(operation.into());
    }

    pub fn remove(&mut self, operation: &str) -> bool {
        self.0.remove(operation)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for OperationSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Backend adapter seam
#[async_trait]
pub trait Driver: Send + Sync {
    /// Short driver name (for logs and metadata)
    fn name(&self) -> &str;

    /// Operations this driver instance implements right now
    fn operations(&self) -> OperationSet;

    /// Invoke a named operation
    async fn invoke(
        &self,
        credentials: &Credentials,
        method: &str,
        params: &Value,
    ) -> anyhow::Result<Value>;
}

/// Read the `id` parameter every lookup and action receives
pub(crate) fn id_param(params: &Value) -> anyhow::Result<&str> {
    params
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: id"))
}

/// Truthiness of an action result
pub fn is_success_signal(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        _ => true,
    }
}
