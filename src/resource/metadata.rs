//! Metadata Collection
//!
//! Describes every client-visible resource type together with what the
//! active driver lets clients do with it.

use super::capability::{self, CapabilitySet};
use super::instance::{Record, ResourceInstance};
use super::registry::{ResourceDef, SchemaRegistry, CIMI_NAMESPACE};
use super::vocabulary::Vocabulary;
use crate::context::Context;
use crate::driver::Driver;
use crate::error::Result;
use crate::resource::instance::AttrValue;

pub const METADATA_TYPE: &str = "EntityMetadata";
pub const METADATA_COLLECTION: &str = "entity_metadata";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMetadata {
    pub name: String,
    pub type_name: String,
    pub required: bool,
    pub constraints: Option<String>,
}

/// One resource type: its schema and current capability set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    pub name: String,
    pub type_uri: String,
    pub attributes: Vec<AttributeMetadata>,
    pub capabilities: CapabilitySet,
    /// Declared actions the driver can perform
    pub actions: Vec<String>,
}

impl EntityMetadata {
    pub fn new(def: &ResourceDef, vocabulary: &Vocabulary, driver: &dyn Driver) -> Self {
        let capabilities = capability::capabilities(def, vocabulary, driver);
        let actions = def
            .actions
            .iter()
            .filter(|action| capabilities.contains(action))
            .cloned()
            .collect();

        Self {
            name: def.name.clone(),
            type_uri: def.type_uri(),
            attributes: def
                .attributes
                .iter()
                .map(|decl| AttributeMetadata {
                    name: decl.name.clone(),
                    type_name: decl.kind.type_name().to_string(),
                    required: decl.required,
                    constraints: decl.constraints.clone(),
                })
                .collect(),
            capabilities,
            actions,
        }
    }

    /// Express this description as an `EntityMetadata` resource
    pub fn to_instance(&self, ctx: &Context) -> ResourceInstance {
        let vocabulary = ctx.engine().schemas().vocabulary();

        let attributes = self
            .attributes
            .iter()
            .map(|attr| {
                let mut record = Record::new();
                record.insert("name".to_string(), attr.name.clone());
                record.insert("namespace".to_string(), CIMI_NAMESPACE.to_string());
                record.insert("type".to_string(), attr.type_name.clone());
                record.insert("required".to_string(), attr.required.to_string());
                if let Some(constraints) = &attr.constraints {
                    record.insert("constraints".to_string(), constraints.clone());
                }
                record
            })
            .collect();

        let capabilities = self
            .capabilities
            .iter()
            .filter(|op| !self.actions.iter().any(|a| a == op))
            .map(|op| {
                Record::from([
                    ("name".to_string(), op.to_string()),
                    ("uri".to_string(), format!("{}/capability/{}", CIMI_NAMESPACE, op)),
                    ("value".to_string(), "true".to_string()),
                ])
            })
            .collect();

        let actions = self
            .actions
            .iter()
            .map(|action| {
                Record::from([
                    ("name".to_string(), action.clone()),
                    ("uri".to_string(), vocabulary.action_rel(action)),
                ])
            })
            .collect();

        let mut instance = ResourceInstance::new(METADATA_TYPE);
        instance
            .set_text("id", ctx.resource_url(METADATA_COLLECTION, &self.name))
            .set_text("name", &self.name)
            .set_text("type_uri", &self.type_uri)
            .set("attributes", AttrValue::Records(attributes))
            .set("capabilities", AttrValue::Records(capabilities))
            .set("actions", AttrValue::Records(actions));
        instance
    }
}

/// Entity metadata over a schema registry
pub struct MetadataCollection<'a> {
    schemas: &'a SchemaRegistry,
}

impl<'a> MetadataCollection<'a> {
    pub fn new(schemas: &'a SchemaRegistry) -> Self {
        Self { schemas }
    }

    /// Every client-visible type, in declaration order
    pub fn list_all(&self, driver: &dyn Driver) -> Vec<EntityMetadata> {
        self.schemas
            .resource_types()
            .filter(|def| !def.internal)
            .map(|def| EntityMetadata::new(def, self.schemas.vocabulary(), driver))
            .collect()
    }

    pub fn describe(&self, resource_type: &str, driver: &dyn Driver) -> Result<EntityMetadata> {
        let def = self.schemas.schema_of(resource_type)?;
        Ok(EntityMetadata::new(def, self.schemas.vocabulary(), driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;
    use crate::error::CimiError;
    use crate::resource::registry::builtin;

    #[test]
    fn test_list_all_skips_internal_types() {
        let registry = builtin();
        let metadata = MetadataCollection::new(&registry).list_all(&MockDriver::new());
        let names: Vec<&str> = metadata.iter().map(|m| m.name.as_str()).collect();

        assert_eq!(names.first(), Some(&"Machine"));
        assert!(names.contains(&"NetworkPort"));
        assert!(!names.contains(&METADATA_TYPE));
    }

    #[test]
    fn test_describe_reflects_driver() {
        let registry = builtin();
        let collection = MetadataCollection::new(&registry);
        let driver = MockDriver::new().without_operations(&["create_instance", "start_instance"]);

        let machine = collection.describe("Machine", &driver).unwrap();
        assert_eq!(machine.type_uri, "http://schemas.dmtf.org/cimi/1/Machine");
        assert!(!machine.capabilities.contains("create"));
        assert_eq!(machine.actions, vec!["stop", "restart"]);
        assert_eq!(machine.attributes[0].name, "id");
        assert!(machine.attributes[0].required);

        assert_eq!(
            collection.describe("Router", &driver).unwrap_err(),
            CimiError::UnknownResourceType("Router".to_string())
        );
    }
}
