//! Machine <-> compute instance
//!
//! The machine's sizing is never on the instance itself: it comes from the
//! instance's hardware profile, optionally overridden per instance, and is
//! hidden altogether for opaque profiles.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::{created, decode, operations, CallParameters, ResourceMapper};
use crate::codec::WireInput;
use crate::context::Context;
use crate::domain::{Instance, InstanceProfile};
use crate::error::{CimiError, Result};
use crate::resource::capability::{self, Operation};
use crate::resource::reference::{self, ResourceReference};
use crate::resource::{AttrValue, ResourceInstance};

const RESOURCE_TYPE: &str = "Machine";
const COLLECTION: &str = "machines";
const NOT_AVAILABLE: &str = "n/a";

pub struct MachineMapper;

#[async_trait]
impl ResourceMapper for MachineMapper {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    async fn from_backend_object(&self, object: Value, ctx: &Context) -> Result<ResourceInstance> {
        let instance: Instance = decode(RESOURCE_TYPE, object)?;
        let vocabulary = ctx.engine().schemas().vocabulary();
        let (cpu, memory) = sizing(&instance.instance_profile, ctx).await?;
        let id = instance.id.as_str();

        let mut machine = ResourceInstance::new(RESOURCE_TYPE);
        machine
            .set_text("id", ctx.resource_url(COLLECTION, id))
            .set_text("name", id)
            .set_opt_text("description", instance.name.clone())
            .set("created", created(instance.launch_time))
            .set_text("state", vocabulary.standard_state(&instance.state))
            .set_opt_text("cpu", cpu)
            .set_opt_text("memory", memory)
            .set_link("disks", ctx.sub_collection_url(COLLECTION, id, "disks"))
            .set_link("volumes", ctx.sub_collection_url(COLLECTION, id, "volumes"))
            .set_link(
                "network_interfaces",
                ctx.sub_collection_url(COLLECTION, id, "network_interfaces"),
            )
            .set_link("event_log", ctx.sub_collection_url(COLLECTION, id, "event_log"))
            .set("operations", operations(ctx, COLLECTION, id, &instance.actions))
            .set("property", AttrValue::Map(properties(&instance, ctx)));
        Ok(machine)
    }

    async fn from_wire_input(&self, input: &WireInput, ctx: &Context) -> Result<CallParameters> {
        let hwp_id = input
            .str_at(&["machineTemplate", "machineConfig", "href"])
            .map(|href| ResourceReference::parse(href, "machine_configurations"))
            .transpose()?
            .map(|r| r.id);
        let image_id = input
            .str_at(&["machineTemplate", "machineImage", "href"])
            .map(|href| ResourceReference::parse(href, "machine_images"))
            .transpose()?
            .map(|r| r.id);
        let keyname = input
            .str_at(&["machineTemplate", "credential", "href"])
            .map(|href| ResourceReference::parse(href, "credentials"))
            .transpose()?
            .map(|r| r.id);
        // a driver without credentials would drop the key silently
        if keyname.is_some() {
            let schemas = ctx.engine().schemas();
            let credential = schemas.schema_of("Credential")?;
            capability::ensure(credential, schemas.vocabulary(), &Operation::Show, ctx.driver())?;
        }

        let mut params = CallParameters::new();
        params
            .require("image_id", image_id)
            .require("hwp_id", hwp_id)
            .optional("name", input.str_at(&["name"]))
            .optional("description", input.str_at(&["description"]))
            .optional("keyname", keyname);
        params.validate(input)
    }
}

/// `(cpu, memory)` in CIMI units (memory in KiB)
async fn sizing(profile: &InstanceProfile, ctx: &Context) -> Result<(Option<String>, Option<String>)> {
    if profile.is_opaque() {
        return Ok((Some(NOT_AVAILABLE.to_string()), Some(NOT_AVAILABLE.to_string())));
    }

    let cpu = profile.overrides.get("cpu").cloned();
    let memory = profile
        .overrides
        .get("memory")
        .and_then(|mb| mb.parse::<u64>().ok())
        .and_then(|mb| mb.checked_mul(1024))
        .map(|kib| kib.to_string());
    if cpu.is_some() && memory.is_some() {
        return Ok((cpu, memory));
    }

    let template = configuration(&profile.id, ctx).await?;
    let from_template = |name: &str| {
        template
            .as_ref()
            .and_then(|t| t.text(name))
            .map(str::to_string)
    };
    Ok((cpu.or_else(|| from_template("cpu")), memory.or_else(|| from_template("memory"))))
}

/// Machine configuration a profile stands for, if the backend still knows it
async fn configuration(profile_id: &str, ctx: &Context) -> Result<Option<ResourceInstance>> {
    match ctx.engine().find("MachineConfiguration", profile_id, ctx).await {
        Ok(config) => Ok(Some(config)),
        Err(CimiError::NotFound { .. } | CimiError::UnsupportedOperation { .. }) => {
            tracing::warn!("Hardware profile '{}' unavailable, machine sizing left empty", profile_id);
            Ok(None)
        },
        Err(e) => Err(e),
    }
}

fn properties(instance: &Instance, ctx: &Context) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    properties.insert(
        "machine_image".to_string(),
        ctx.resource_url("machine_images", &instance.image_id),
    );
    if let Some(keyname) = &instance.keyname {
        properties.insert(
            "credential".to_string(),
            ctx.resource_url("credentials", keyname),
        );
    }
    properties
}

/// Attach volumes (`(href, device)` pairs) to a machine, then return it
pub async fn attach_volumes(
    machine_id: &str,
    volumes: &[(String, String)],
    ctx: &Context,
) -> Result<ResourceInstance> {
    change_attachments("attach_storage_volume", machine_id, volumes, ctx).await
}

/// Detach volumes from a machine, then return it
pub async fn detach_volumes(
    machine_id: &str,
    volumes: &[(String, String)],
    ctx: &Context,
) -> Result<ResourceInstance> {
    change_attachments("detach_storage_volume", machine_id, volumes, ctx).await
}

async fn change_attachments(
    method: &str,
    machine_id: &str,
    volumes: &[(String, String)],
    ctx: &Context,
) -> Result<ResourceInstance> {
    if !ctx.supports(method) {
        return Err(CimiError::unsupported("Volume", method));
    }

    for (href, device) in volumes {
        let volume = reference::resolve(href, "volumes", ctx).await?;
        let volume_id = volume.backend_id().ok_or_else(|| CimiError::MalformedReference {
            href: href.clone(),
            reason: "resolved volume has no identifier".to_string(),
        })?;

        tracing::info!("{}: volume {} on machine {} ({})", method, volume_id, machine_id, device);
        ctx.invoke(
            method,
            json!({ "id": volume_id, "instance_id": machine_id, "device": device }),
        )
        .await?;
    }

    ctx.engine().find(RESOURCE_TYPE, machine_id, ctx).await
}
