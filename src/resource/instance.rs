//! Resource instances
//!
//! A [`ResourceInstance`] is built fresh for every request, either from a
//! backend object or from request input, and dropped once the response is
//! serialized. [`RenderedResource`] is the schema-ordered form produced by
//! the registry.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::reference::ResourceReference;

/// One entry of a structured list (e.g. `{rel, href}`)
pub type Record = BTreeMap<String, String>;

/// Link to another resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    pub rel: Option<String>,
}

impl Link {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            rel: None,
        }
    }
}

/// Attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Text(String),
    Link(Link),
    Records(Vec<Record>),
    Map(BTreeMap<String, String>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_href(&self) -> Option<&str> {
        match self {
            Self::Link(link) => Some(&link.href),
            _ => None,
        }
    }

    fn to_param(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Link(link) => Value::String(link.href.clone()),
            Self::Records(records) => Value::Array(
                records
                    .iter()
                    .map(|r| {
                        Value::Object(
                            r.iter()
                                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                                .collect(),
                        )
                    })
                    .collect(),
            ),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        }
    }
}

/// Format a timestamp the way every resource exposes it
pub fn timestamp(at: DateTime<Utc>) -> AttrValue {
    AttrValue::Text(at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Instantiated resource: attribute name -> value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInstance {
    resource_type: String,
    values: BTreeMap<String, AttrValue>,
}

impl ResourceInstance {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn set(&mut self, name: impl Into<String>, value: AttrValue) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn set_text(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.set(name, AttrValue::Text(value.into()))
    }

    /// Set a text attribute only when a value exists
    pub fn set_opt_text<S: Into<String>>(
        &mut self,
        name: impl Into<String>,
        value: Option<S>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.set_text(name, value);
        }
        self
    }

    pub fn set_link(&mut self, name: impl Into<String>, href: impl Into<String>) -> &mut Self {
        self.set(name, AttrValue::Link(Link::new(href)))
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttrValue::as_text)
    }

    pub fn href(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttrValue::as_href)
    }

    /// Canonical URL of this resource
    pub fn id(&self) -> Option<&str> {
        self.text("id")
    }

    /// Backend identifier, taken from the trailing segment of `id`
    pub fn backend_id(&self) -> Option<String> {
        let href = self.id()?;
        ResourceReference::trailing_segment(href).ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Flatten into driver call parameters (links become plain hrefs)
    pub fn to_params(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_param()))
            .collect()
    }
}

/// Schema-ordered attributes, ready for a codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedResource {
    pub resource_type: String,
    pub attributes: Vec<(String, AttrValue)>,
}

impl RenderedResource {
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn names(&self) -> Vec<&str> {
        self.attributes.iter().map(|(n, _)| n.as_str()).collect()
    }
}
