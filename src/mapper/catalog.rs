//! Read-only catalog types: sizes, images, credentials, volumes, networks
//! and the network port building blocks.

use async_trait::async_trait;
use serde_json::Value;

use super::{created, decode, ResourceMapper};
use crate::context::Context;
use crate::domain::{
    HardwareProfile, Image, Key, Network, NetworkPortConfig, NetworkPortTemplate, StorageVolume,
};
use crate::error::Result;
use crate::resource::ResourceInstance;

/// KiB per GB, for volume capacities
const KIB_PER_GB: u64 = 1024 * 1024;

pub struct MachineConfigurationMapper;

#[async_trait]
impl ResourceMapper for MachineConfigurationMapper {
    fn resource_type(&self) -> &'static str {
        "MachineConfiguration"
    }

    async fn from_backend_object(&self, object: Value, ctx: &Context) -> Result<ResourceInstance> {
        let profile: HardwareProfile = decode(self.resource_type(), object)?;
        let memory = profile.memory.and_then(|mb| mb.checked_mul(1024));
        let description = match (memory, profile.cpu) {
            (Some(memory), Some(cpu)) => Some(format!(
                "Machine Configuration with {} KiB of memory and {} CPU",
                memory, cpu
            )),
            _ => None,
        };

        let mut config = ResourceInstance::new(self.resource_type());
        config
            .set_text("id", ctx.resource_url("machine_configurations", &profile.id))
            .set_text("name", profile.name.as_deref().unwrap_or(&profile.id))
            .set_opt_text("description", description)
            .set("created", created(None))
            .set_opt_text("cpu", profile.cpu.map(|c| c.to_string()))
            .set_opt_text("memory", memory.map(|m| m.to_string()));
        Ok(config)
    }
}

pub struct MachineImageMapper;

#[async_trait]
impl ResourceMapper for MachineImageMapper {
    fn resource_type(&self) -> &'static str {
        "MachineImage"
    }

    async fn from_backend_object(&self, object: Value, ctx: &Context) -> Result<ResourceInstance> {
        let image: Image = decode(self.resource_type(), object)?;
        let vocabulary = ctx.engine().schemas().vocabulary();

        let mut instance = ResourceInstance::new(self.resource_type());
        instance
            .set_text("id", ctx.resource_url("machine_images", &image.id))
            .set_text("name", image.name.as_deref().unwrap_or(&image.id))
            .set_opt_text("description", image.description.clone())
            .set("created", created(None))
            .set_opt_text("state", image.state.as_deref().map(|s| vocabulary.standard_state(s)))
            .set_opt_text("architecture", image.architecture.clone());
        Ok(instance)
    }
}

pub struct CredentialMapper;

#[async_trait]
impl ResourceMapper for CredentialMapper {
    fn resource_type(&self) -> &'static str {
        "Credential"
    }

    async fn from_backend_object(&self, object: Value, ctx: &Context) -> Result<ResourceInstance> {
        let key: Key = decode(self.resource_type(), object)?;

        let mut credential = ResourceInstance::new(self.resource_type());
        credential
            .set_text("id", ctx.resource_url("credentials", &key.id))
            .set_text("name", &key.id)
            .set("created", created(None))
            .set_opt_text("username", key.username.clone())
            .set_opt_text("fingerprint", key.fingerprint.clone());
        Ok(credential)
    }
}

pub struct VolumeMapper;

#[async_trait]
impl ResourceMapper for VolumeMapper {
    fn resource_type(&self) -> &'static str {
        "Volume"
    }

    async fn from_backend_object(&self, object: Value, ctx: &Context) -> Result<ResourceInstance> {
        let volume: StorageVolume = decode(self.resource_type(), object)?;
        let vocabulary = ctx.engine().schemas().vocabulary();

        let mut instance = ResourceInstance::new(self.resource_type());
        instance
            .set_text("id", ctx.resource_url("volumes", &volume.id))
            .set_text("name", volume.name.as_deref().unwrap_or(&volume.id))
            .set("created", created(volume.created))
            .set_opt_text("state", volume.state.as_deref().map(|s| vocabulary.standard_state(s)))
            .set_opt_text(
                "capacity",
                volume
                    .capacity
                    .and_then(|gb| gb.checked_mul(KIB_PER_GB))
                    .map(|kib| kib.to_string()),
            );
        Ok(instance)
    }
}

pub struct NetworkMapper;

#[async_trait]
impl ResourceMapper for NetworkMapper {
    fn resource_type(&self) -> &'static str {
        "Network"
    }

    async fn from_backend_object(&self, object: Value, ctx: &Context) -> Result<ResourceInstance> {
        let network: Network = decode(self.resource_type(), object)?;
        let vocabulary = ctx.engine().schemas().vocabulary();
        let id = network.id.as_str();

        let mut instance = ResourceInstance::new(self.resource_type());
        instance
            .set_text("id", ctx.resource_url("networks", id))
            .set_text("name", network.name.as_deref().unwrap_or(id))
            .set_opt_text("description", network.description.clone())
            .set("created", created(None))
            .set_opt_text("state", network.state.as_deref().map(|s| vocabulary.standard_state(s)))
            .set_link("network_ports", ctx.sub_collection_url("networks", id, "network_ports"))
            .set_link("event_log", ctx.sub_collection_url("networks", id, "event_log"));
        Ok(instance)
    }
}

pub struct NetworkPortTemplateMapper;

#[async_trait]
impl ResourceMapper for NetworkPortTemplateMapper {
    fn resource_type(&self) -> &'static str {
        "NetworkPortTemplate"
    }

    async fn from_backend_object(&self, object: Value, ctx: &Context) -> Result<ResourceInstance> {
        let template: NetworkPortTemplate = decode(self.resource_type(), object)?;

        let mut instance = ResourceInstance::new(self.resource_type());
        instance
            .set_text("id", ctx.resource_url("network_port_templates", &template.id))
            .set_text("name", template.name.as_deref().unwrap_or(&template.id))
            .set_opt_text("description", template.description.clone())
            .set("created", created(None))
            .set_link("network", ctx.resource_url("networks", &template.network))
            .set_link(
                "network_port_config",
                ctx.resource_url("network_port_configurations", &template.network_port_config),
            );
        Ok(instance)
    }
}

pub struct NetworkPortConfigurationMapper;

impl NetworkPortConfigurationMapper {
    const RESOURCE_TYPE: &'static str = "NetworkPortConfiguration";

    /// Configuration given by value inside a request
    pub fn from_tree(tree: &Value, ctx: &Context) -> Result<ResourceInstance> {
        let def = ctx.engine().schemas().schema_of(Self::RESOURCE_TYPE)?;
        Ok(super::from_tree(def, tree))
    }
}

#[async_trait]
impl ResourceMapper for NetworkPortConfigurationMapper {
    fn resource_type(&self) -> &'static str {
        Self::RESOURCE_TYPE
    }

    async fn from_backend_object(&self, object: Value, ctx: &Context) -> Result<ResourceInstance> {
        let config: NetworkPortConfig = decode(self.resource_type(), object)?;

        let mut instance = ResourceInstance::new(self.resource_type());
        instance
            .set_text("id", ctx.resource_url("network_port_configurations", &config.id))
            .set_text("name", config.name.as_deref().unwrap_or(&config.id))
            .set_opt_text("description", config.description.clone())
            .set("created", created(None))
            .set_opt_text("port_type", config.port_type.clone())
            .set_opt_text("class_of_service", config.class_of_service.clone())
            .set_opt_text("traffic_priority", config.traffic_priority.map(|p| p.to_string()))
            .set_opt_text(
                "max_transmission_unit",
                config.max_transmission_unit.map(|m| m.to_string()),
            );
        Ok(instance)
    }
}
