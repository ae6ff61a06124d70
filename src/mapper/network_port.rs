//! NetworkPort <-> network port
//!
//! A create request names its configuration in one of three ways:
//!
//! 1. a template by reference (`networkPortTemplate.href`); the template's
//!    own configuration and network references are resolved in turn
//! 2. an inline template whose configuration is a reference
//! 3. an inline template with the configuration given by value
//!
//! In modes 2 and 3 the network comes from the inline template.

use async_trait::async_trait;
use serde_json::Value;

use super::catalog::NetworkPortConfigurationMapper;
use super::{created, decode, operations, CallParameters, ResourceMapper};
use crate::codec::{self, WireInput};
use crate::context::Context;
use crate::domain::NetworkPort;
use crate::error::Result;
use crate::resource::reference;
use crate::resource::ResourceInstance;

const RESOURCE_TYPE: &str = "NetworkPort";
const COLLECTION: &str = "network_ports";

pub struct NetworkPortMapper;

#[async_trait]
impl ResourceMapper for NetworkPortMapper {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    async fn from_backend_object(&self, object: Value, ctx: &Context) -> Result<ResourceInstance> {
        let port: NetworkPort = decode(RESOURCE_TYPE, object)?;
        let vocabulary = ctx.engine().schemas().vocabulary();
        let id = port.id.as_str();

        let mut instance = ResourceInstance::new(RESOURCE_TYPE);
        instance
            .set_text("id", ctx.resource_url(COLLECTION, id))
            .set_text("name", port.name.as_deref().unwrap_or(id))
            .set_opt_text("description", port.description.clone())
            .set("created", created(port.created))
            .set_text("state", vocabulary.standard_state(&port.state))
            .set_link("network", ctx.resource_url("networks", &port.network))
            .set_opt_text("port_type", port.port_type.clone())
            .set_opt_text("class_of_service", port.class_of_service.clone())
            .set_link("event_log", ctx.sub_collection_url(COLLECTION, id, "event_log"))
            .set("operations", operations(ctx, COLLECTION, id, &port.actions));
        Ok(instance)
    }

    async fn from_wire_input(&self, input: &WireInput, ctx: &Context) -> Result<CallParameters> {
        let (config, network) = match input.get(&["networkPortTemplate"]) {
            Some(template) => match codec::str_at(template, &["href"]) {
                Some(href) => by_template_reference(href, ctx).await?,
                None => by_inline_template(template, ctx).await?,
            },
            None => (None, None),
        };

        let mut params = CallParameters::new();
        params
            .require(
                "network_port_config",
                config.map(|c| Value::Object(c.to_params())),
            )
            .require("network", network.and_then(|n| n.backend_id()))
            .optional("name", input.str_at(&["name"]))
            .optional("description", input.str_at(&["description"]));
        params.validate(input)
    }
}

type Resolved = (Option<ResourceInstance>, Option<ResourceInstance>);

async fn by_template_reference(href: &str, ctx: &Context) -> Result<Resolved> {
    let template = reference::resolve(href, "network_port_templates", ctx).await?;

    let config = match template.href("network_port_config") {
        Some(config_href) => Some(
            reference::resolve_nested(config_href, "network_port_configurations", ctx).await?,
        ),
        None => None,
    };
    let network = match template.href("network") {
        Some(network_href) => Some(reference::resolve_nested(network_href, "networks", ctx).await?),
        None => None,
    };
    Ok((config, network))
}

async fn by_inline_template(template: &Value, ctx: &Context) -> Result<Resolved> {
    let config = match codec::str_at(template, &["networkPortConfig", "href"]) {
        Some(href) => Some(reference::resolve(href, "network_port_configurations", ctx).await?),
        None => template
            .get("networkPortConfig")
            .filter(|v| v.is_object())
            .map(|tree| NetworkPortConfigurationMapper::from_tree(tree, ctx))
            .transpose()?,
    };
    let network = match codec::str_at(template, &["network", "href"]) {
        Some(href) => Some(reference::resolve(href, "networks", ctx).await?),
        None => None,
    };
    Ok((config, network))
}
