//! Schema Registry - Load resource definitions from JSON
//!
//! Every CIMI resource type is declared in an embedded JSON file: its
//! collection name, the driver operations backing it, the actions it may
//! expose and its ordered attribute list. The registry is built once at
//! startup and only read afterwards, so concurrent requests share it
//! without locking.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::instance::{RenderedResource, ResourceInstance};
use super::vocabulary::Vocabulary;
use crate::error::{CimiError, Result, SchemaError};

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/common.json"),
    include_str!("../resources/compute.json"),
    include_str!("../resources/network.json"),
];

/// Namespace of CIMI resource type URIs
pub const CIMI_NAMESPACE: &str = "http://schemas.dmtf.org/cimi/1";

/// Attribute kind
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Text,
    Enum,
    Numeric,
    /// Link to another resource
    Href,
    /// Ordered list of small records
    Array,
    /// Free-form string map
    Map,
}

impl AttributeKind {
    /// Type name published in entity metadata
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text | Self::Enum => "xs:string",
            Self::Numeric => "xs:integer",
            Self::Href => "href",
            Self::Array => "array",
            Self::Map => "map",
        }
    }
}

/// Attribute declaration from JSON
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AttributeDecl {
    pub name: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub required: bool,
    /// Primary, addressable identity of the resource
    #[serde(default)]
    pub identity: bool,
    /// Field names of each record (array attributes only)
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub constraints: Option<String>,
}

impl AttributeDecl {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            identity: false,
            fields: Vec::new(),
            constraints: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_constraints(mut self, constraints: impl Into<String>) -> Self {
        self.constraints = Some(constraints.into());
        self
    }
}

/// Driver operations backing a resource type
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct DriverBinding {
    /// List operation (e.g. `instances`)
    #[serde(default)]
    pub list: Option<String>,
    /// Single lookup operation (e.g. `instance`)
    #[serde(default)]
    pub lookup: Option<String>,
    #[serde(default)]
    pub create: Option<String>,
    #[serde(default)]
    pub delete: Option<String>,
    /// Verb suffix composed with action names (`start` -> `start_instance`)
    #[serde(default)]
    pub action_suffix: Option<String>,
}

impl DriverBinding {
    pub fn action_method(&self, action: &str) -> Option<String> {
        self.action_suffix
            .as_ref()
            .map(|suffix| format!("{}_{}", action, suffix))
    }
}

/// Resource definition from JSON
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ResourceDef {
    pub name: String,
    pub collection: String,
    /// Listed at the cloud entry point
    #[serde(default)]
    pub root_entity: bool,
    /// Not listed in entity metadata
    #[serde(default)]
    pub internal: bool,
    #[serde(default = "default_true")]
    pub inherit_base: bool,
    #[serde(default)]
    pub driver: DriverBinding,
    /// CIMI actions this type may expose
    #[serde(default)]
    pub actions: Vec<String>,
    pub attributes: Vec<AttributeDecl>,
}

fn default_true() -> bool {
    true
}

impl ResourceDef {
    pub fn new(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            root_entity: false,
            internal: false,
            inherit_base: false,
            driver: DriverBinding::default(),
            actions: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDecl> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn identity(&self) -> Option<&AttributeDecl> {
        self.attributes.iter().find(|a| a.identity)
    }

    pub fn type_uri(&self) -> String {
        format!("{}/{}", CIMI_NAMESPACE, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct BaseAttributes {
    #[serde(default)]
    head: Vec<AttributeDecl>,
    #[serde(default)]
    tail: Vec<AttributeDecl>,
}

/// Root structure of resources/*.json
#[derive(Debug, Deserialize)]
struct ResourceFile {
    #[serde(default)]
    vocabulary: Option<Vocabulary>,
    #[serde(default)]
    base_attributes: Option<BaseAttributes>,
    #[serde(default)]
    fallback_attributes: Vec<AttributeDecl>,
    #[serde(default)]
    resources: Vec<ResourceDef>,
}

/// Declared resource types, in declaration order
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    defs: Vec<ResourceDef>,
    by_name: HashMap<String, usize>,
    by_collection: HashMap<String, usize>,
    vocabulary: Vocabulary,
}

impl SchemaRegistry {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self {
            vocabulary,
            ..Self::default()
        }
    }

    /// Build the registry from the embedded resource files
    pub fn from_embedded() -> std::result::Result<Self, SchemaError> {
        Self::from_sources(RESOURCE_FILES)
    }

    /// Build a registry from resource file contents
    pub fn from_sources(sources: &[&str]) -> std::result::Result<Self, SchemaError> {
        let mut vocabulary = Vocabulary::default();
        let mut head = Vec::new();
        let mut tail = Vec::new();
        let mut fallbacks = Vec::new();
        let mut defs = Vec::new();

        for content in sources {
            let partial: ResourceFile = serde_json::from_str(content)?;
            if let Some(v) = partial.vocabulary {
                if vocabulary.action_rel_prefix.is_empty() {
                    vocabulary.action_rel_prefix = v.action_rel_prefix.clone();
                }
                vocabulary.extend(v);
            }
            if let Some(base) = partial.base_attributes {
                head.extend(base.head);
                tail.extend(base.tail);
            }
            fallbacks.extend(partial.fallback_attributes);
            defs.extend(partial.resources);
        }

        let mut registry = Self::new(vocabulary);
        for mut def in defs {
            if def.inherit_base {
                let own = std::mem::take(&mut def.attributes);
                let inherited = |decl: &&AttributeDecl| !own.iter().any(|a| a.name == decl.name);
                let mut attributes: Vec<AttributeDecl> =
                    head.iter().filter(inherited).cloned().collect();
                let trailing: Vec<AttributeDecl> = tail.iter().filter(inherited).cloned().collect();
                attributes.extend(own);
                attributes.extend(trailing);
                def.attributes = attributes;
            }
            let name = def.name.clone();
            registry.declare(def)?;
            for fallback in &fallbacks {
                registry.augment_with_fallback(&name, fallback.clone())?;
            }
        }

        tracing::debug!("Schema registry loaded {} resource types", registry.defs.len());
        Ok(registry)
    }

    /// Register a resource type. Each type (and collection) is declared once.
    pub fn declare(&mut self, def: ResourceDef) -> std::result::Result<(), SchemaError> {
        if self.by_name.contains_key(&def.name) {
            return Err(SchemaError::DuplicateResourceType(def.name));
        }
        if let Some(&existing) = self.by_collection.get(&def.collection) {
            return Err(SchemaError::DuplicateCollection {
                collection: def.collection,
                existing: self.defs[existing].name.clone(),
            });
        }
        for (i, attr) in def.attributes.iter().enumerate() {
            if def.attributes[..i].iter().any(|a| a.name == attr.name) {
                return Err(SchemaError::DuplicateAttribute {
                    resource_type: def.name.clone(),
                    attribute: attr.name.clone(),
                });
            }
        }
        if def.attributes.iter().filter(|a| a.identity).count() > 1 {
            return Err(SchemaError::MultipleIdentity(def.name));
        }

        let index = self.defs.len();
        self.by_name.insert(def.name.clone(), index);
        self.by_collection.insert(def.collection.clone(), index);
        self.defs.push(def);
        Ok(())
    }

    /// Make sure `fallback` is declared for a type, without touching an
    /// existing declaration of the same name. Returns whether it was added.
    pub fn augment_with_fallback(
        &mut self,
        resource_type: &str,
        fallback: AttributeDecl,
    ) -> std::result::Result<bool, SchemaError> {
        let Some(&index) = self.by_name.get(resource_type) else {
            return Err(SchemaError::UnknownResourceType(resource_type.to_string()));
        };
        let def = &mut self.defs[index];
        if def.attribute(&fallback.name).is_some() {
            return Ok(false);
        }

        let position = def
            .attributes
            .iter()
            .position(|a| a.identity)
            .map(|i| i + 1)
            .unwrap_or(0);
        def.attributes.insert(position, fallback);
        Ok(true)
    }

    pub fn schema_of(&self, resource_type: &str) -> Result<&ResourceDef> {
        self.by_name
            .get(resource_type)
            .map(|&i| &self.defs[i])
            .ok_or_else(|| CimiError::UnknownResourceType(resource_type.to_string()))
    }

    pub fn by_collection(&self, collection: &str) -> Result<&ResourceDef> {
        self.by_collection
            .get(collection)
            .map(|&i| &self.defs[i])
            .ok_or_else(|| CimiError::UnknownResourceType(collection.to_string()))
    }

    /// All declared types, in declaration order
    pub fn resource_types(&self) -> impl Iterator<Item = &ResourceDef> {
        self.defs.iter()
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Extend the vocabulary tables (startup only)
    pub fn vocabulary_mut(&mut self) -> &mut Vocabulary {
        &mut self.vocabulary
    }

    /// Order an instance's attributes by declaration. Absent optional
    /// attributes are omitted; an absent required one fails the render.
    pub fn render(&self, instance: &ResourceInstance) -> Result<RenderedResource> {
        let def = self.schema_of(instance.resource_type())?;

        let mut attributes = Vec::with_capacity(def.attributes.len());
        for decl in &def.attributes {
            match instance.get(&decl.name) {
                Some(value) => attributes.push((decl.name.clone(), value.clone())),
                None if decl.required => {
                    return Err(CimiError::MissingRequiredAttribute {
                        resource_type: def.name.clone(),
                        attribute: decl.name.clone(),
                    });
                },
                None => {},
            }
        }

        for (name, _) in instance.iter() {
            if def.attribute(name).is_none() {
                tracing::trace!("{} has no attribute '{}', dropped from output", def.name, name);
            }
        }

        Ok(RenderedResource {
            resource_type: def.name.clone(),
            attributes,
        })
    }
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<Arc<SchemaRegistry>> = OnceLock::new();

/// Get the built-in registry (loads from embedded JSON on first access)
pub fn builtin() -> Arc<SchemaRegistry> {
    REGISTRY
        .get_or_init(|| {
            let registry = SchemaRegistry::from_embedded()
                .unwrap_or_else(|e| panic!("Failed to load embedded resource definitions: {}", e));
            Arc::new(registry)
        })
        .clone()
}
