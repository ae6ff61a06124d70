//! Resource Mappers
//!
//! One mapper per resource type, translating in both directions:
//!
//! - read path: backend object (see [`crate::domain`]) -> [`ResourceInstance`]
//! - write path: client [`WireInput`] -> driver [`CallParameters`]
//!
//! Mappers never talk to the driver directly. Anything they need beyond the
//! object in hand goes through the engine (`find`) or the reference
//! resolver, both of which honor the capability filter and the context.

mod catalog;
mod machine;
mod network_port;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::codec::{camel_case, WireInput};
use crate::context::Context;
use crate::error::{CimiError, Result};
use crate::resource::instance::timestamp;
use crate::resource::{AttrValue, AttributeKind, Record, ResourceDef, ResourceInstance};

pub use catalog::{
    CredentialMapper, MachineConfigurationMapper, MachineImageMapper, NetworkMapper,
    NetworkPortConfigurationMapper, NetworkPortTemplateMapper, VolumeMapper,
};
pub use machine::{attach_volumes, detach_volumes, MachineMapper};
pub use network_port::NetworkPortMapper;

#[async_trait]
pub trait ResourceMapper: Send + Sync {
    fn resource_type(&self) -> &'static str;

    /// Read path: translate one backend object
    async fn from_backend_object(&self, object: Value, ctx: &Context) -> Result<ResourceInstance>;

    /// Write path: derive driver parameters from a create request
    async fn from_wire_input(&self, input: &WireInput, ctx: &Context) -> Result<CallParameters> {
        let _ = (input, ctx);
        Err(CimiError::unsupported(self.resource_type(), "create"))
    }
}

/// Driver call parameters derived from a request.
///
/// Absent optional values are never sent. Absent required values are
/// collected and reported together by [`CallParameters::validate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallParameters {
    params: Map<String, Value>,
    missing: Vec<String>,
}

impl CallParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require<V: Into<Value>>(&mut self, key: &str, value: Option<V>) -> &mut Self {
        match value {
            Some(value) => {
                self.params.insert(key.to_string(), value.into());
            },
            None => self.missing.push(key.to_string()),
        }
        self
    }

    pub fn optional<V: Into<Value>>(&mut self, key: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.params.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Fail with the client's payload and what it produced when a required
    /// value is missing
    pub fn validate(self, input: &WireInput) -> Result<Self> {
        if self.missing.is_empty() {
            return Ok(self);
        }

        let mut derived = self.params.clone();
        for key in &self.missing {
            derived.insert(key.clone(), Value::Null);
        }
        Err(CimiError::BadRequest {
            message: format!("missing required parameters: {}", self.missing.join(", ")),
            supplied: input.raw().to_string(),
            derived: Value::Object(derived).to_string(),
        })
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.params)
    }
}

/// Mappers by resource type
pub struct MapperRegistry {
    mappers: HashMap<&'static str, Box<dyn ResourceMapper>>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self {
            mappers: HashMap::new(),
        }
    }

    /// Mappers for every built-in resource type
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(Box::new(MachineMapper))
            .register(Box::new(MachineConfigurationMapper))
            .register(Box::new(MachineImageMapper))
            .register(Box::new(CredentialMapper))
            .register(Box::new(VolumeMapper))
            .register(Box::new(NetworkMapper))
            .register(Box::new(NetworkPortMapper))
            .register(Box::new(NetworkPortTemplateMapper))
            .register(Box::new(NetworkPortConfigurationMapper));
        registry
    }

    pub fn register(&mut self, mapper: Box<dyn ResourceMapper>) -> &mut Self {
        self.mappers.insert(mapper.resource_type(), mapper);
        self
    }

    pub fn get(&self, resource_type: &str) -> Result<&dyn ResourceMapper> {
        self.mappers
            .get(resource_type)
            .map(|m| m.as_ref())
            .ok_or_else(|| CimiError::UnknownResourceType(resource_type.to_string()))
    }
}

impl Default for MapperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserialize a backend object; a shape mismatch is a backend fault
pub(crate) fn decode<T: DeserializeOwned>(resource_type: &str, object: Value) -> Result<T> {
    serde_json::from_value(object).map_err(|e| CimiError::Backend {
        operation: format!("decode {}", resource_type),
        message: e.to_string(),
    })
}

/// `created`, falling back to the time of the request
pub(crate) fn created(at: Option<DateTime<Utc>>) -> AttrValue {
    timestamp(at.unwrap_or_else(Utc::now))
}

/// Operations list for backend actions: `{rel, href}` per action, in CIMI
/// vocabulary
pub(crate) fn operations(
    ctx: &Context,
    collection: &str,
    id: &str,
    backend_actions: &[String],
) -> AttrValue {
    let vocabulary = ctx.engine().schemas().vocabulary();
    AttrValue::Records(
        backend_actions
            .iter()
            .map(|action| {
                let action = vocabulary.standard_action(action);
                Record::from([
                    ("rel".to_string(), vocabulary.action_rel(action)),
                    ("href".to_string(), ctx.action_url(collection, id, action)),
                ])
            })
            .collect(),
    )
}

/// Build an instance from a by-value object in a request (camelCase keys).
/// Only scalar attributes are taken.
pub(crate) fn from_tree(def: &ResourceDef, tree: &Value) -> ResourceInstance {
    let mut instance = ResourceInstance::new(def.name.clone());
    for decl in &def.attributes {
        if !matches!(
            decl.kind,
            AttributeKind::Text | AttributeKind::Enum | AttributeKind::Numeric
        ) {
            continue;
        }
        let text = match tree.get(camel_case(&decl.name)) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => continue,
        };
        instance.set_text(decl.name.clone(), text);
    }
    instance
}
