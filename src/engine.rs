//! Request engine
//!
//! Entry point for every CIMI operation. The engine owns the read-only
//! pieces shared by all requests (schema registry, mappers, settings); each
//! request brings its own [`Context`].
//!
//! Every operation is gated by the capability filter before the driver is
//! touched, so an unsupported operation never reaches the backend.

use anyhow::Result as AnyResult;
use futures::future::try_join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::codec::{WireFormat, WireInput};
use crate::config::Config;
use crate::context::{Context, UrlBuilder};
use crate::driver::{is_success_signal, Credentials, Driver};
use crate::error::{CimiError, Result};
use crate::mapper::{self, MapperRegistry, ResourceMapper};
use crate::resource::capability::{self, Operation};
use crate::resource::dispatch::{self, ActionOutcome, OutcomeHandler};
use crate::resource::metadata::{EntityMetadata, MetadataCollection};
use crate::resource::registry::{self, ResourceDef, SchemaRegistry};
use crate::resource::{RenderedResource, ResourceInstance};

/// Default bound on nested reference resolution
pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub urls: UrlBuilder,
    pub max_reference_depth: usize,
    /// Per-request deadline; `None` waits as long as the backend takes
    pub request_timeout: Option<Duration>,
}

impl EngineSettings {
    pub fn new(base_url: &str) -> AnyResult<Self> {
        Ok(Self {
            urls: UrlBuilder::new(base_url)?,
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
            request_timeout: None,
        })
    }

    pub fn from_config(config: &Config) -> AnyResult<Self> {
        Ok(Self {
            urls: UrlBuilder::new(&config.base_url)?,
            max_reference_depth: config.max_reference_depth,
            request_timeout: config.request_timeout(),
        })
    }
}

pub struct Engine {
    schemas: Arc<SchemaRegistry>,
    mappers: MapperRegistry,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(schemas: Arc<SchemaRegistry>, mappers: MapperRegistry, settings: EngineSettings) -> Self {
        Self {
            schemas,
            mappers,
            settings,
        }
    }

    /// Engine over the built-in resource types and mappers
    pub fn standard(settings: EngineSettings) -> Self {
        Self::new(registry::builtin(), MapperRegistry::builtin(), settings)
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn mapper(&self, resource_type: &str) -> Result<&dyn ResourceMapper> {
        self.mappers.get(resource_type)
    }

    /// Start a request
    pub fn context(self: &Arc<Self>, driver: Arc<dyn Driver>, credentials: Credentials) -> Context {
        Context::new(Arc::clone(self), driver, credentials)
    }

    pub fn metadata(&self) -> MetadataCollection<'_> {
        MetadataCollection::new(&self.schemas)
    }

    fn gate(&self, resource_type: &str, operation: &Operation, ctx: &Context) -> Result<&ResourceDef> {
        let def = self.schemas.schema_of(resource_type)?;
        capability::ensure(def, self.schemas.vocabulary(), operation, ctx.driver())?;
        Ok(def)
    }

    /// Current representation of one resource
    pub async fn find(&self, resource_type: &str, id: &str, ctx: &Context) -> Result<ResourceInstance> {
        let def = self.gate(resource_type, &Operation::Show, ctx)?;
        let mapper = self.mapper(resource_type)?;

        let lookup = def.driver.lookup.as_deref().filter(|m| ctx.supports(m));
        let object = match (lookup, def.driver.list.as_deref()) {
            (Some(method), _) => ctx.invoke(method, json!({ "id": id })).await?,
            (None, Some(list)) => {
                tracing::debug!("{} has no lookup, scanning {}", resource_type, list);
                let all = ctx.invoke(list, json!({})).await?;
                all.as_array()
                    .and_then(|items| {
                        items
                            .iter()
                            .find(|item| item.get("id").and_then(Value::as_str) == Some(id))
                    })
                    .cloned()
                    .unwrap_or(Value::Null)
            },
            (None, None) => return Err(CimiError::unsupported(resource_type, "show")),
        };

        if object.is_null() {
            return Err(CimiError::not_found(resource_type, id));
        }
        mapper.from_backend_object(object, ctx).await
    }

    /// Every resource of a type
    pub async fn find_all(&self, resource_type: &str, ctx: &Context) -> Result<Vec<ResourceInstance>> {
        let def = self.gate(resource_type, &Operation::Index, ctx)?;
        let mapper = self.mapper(resource_type)?;
        let Some(list) = def.driver.list.as_deref() else {
            return Err(CimiError::unsupported(resource_type, "index"));
        };

        let span = tracing::info_span!("index", request = %ctx.request_id(), resource_type);
        async {
            let objects = match ctx.invoke(list, json!({})).await? {
                Value::Array(items) => items,
                other => {
                    return Err(CimiError::Backend {
                        operation: list.to_string(),
                        message: format!("expected a list, got {}", other),
                    })
                },
            };
            tracing::debug!("{} returned {} objects", list, objects.len());

            try_join_all(
                objects
                    .into_iter()
                    .map(|object| mapper.from_backend_object(object, ctx)),
            )
            .await
        }
        .instrument(span)
        .await
    }

    /// Resolve a collection name first (`machines` -> `Machine`)
    pub async fn find_in_collection(
        &self,
        collection: &str,
        id: &str,
        ctx: &Context,
    ) -> Result<ResourceInstance> {
        let def = self.schemas.by_collection(collection)?;
        self.find(&def.name, id, ctx).await
    }

    /// Create a resource from a client request body
    pub async fn create(
        &self,
        resource_type: &str,
        body: &str,
        format: WireFormat,
        ctx: &Context,
    ) -> Result<ResourceInstance> {
        let def = self.gate(resource_type, &Operation::Create, ctx)?;
        let mapper = self.mapper(resource_type)?;
        let Some(method) = def.driver.create.as_deref() else {
            return Err(CimiError::unsupported(resource_type, "create"));
        };

        let span = tracing::info_span!("create", request = %ctx.request_id(), resource_type);
        async {
            let input = WireInput::parse(body, format)?;
            let params = mapper.from_wire_input(&input, ctx).await?;

            tracing::info!("Creating {} via {}", resource_type, method);
            let object = ctx.invoke(method, params.into_value()).await?;
            if object.is_null() {
                return Err(CimiError::Backend {
                    operation: method.to_string(),
                    message: "backend returned no resource".to_string(),
                });
            }
            mapper.from_backend_object(object, ctx).await
        }
        .instrument(span)
        .await
    }

    pub async fn delete(&self, resource_type: &str, id: &str, ctx: &Context) -> Result<()> {
        let def = self.gate(resource_type, &Operation::Delete, ctx)?;
        let Some(method) = def.driver.delete.as_deref() else {
            return Err(CimiError::unsupported(resource_type, "delete"));
        };

        tracing::info!("Deleting {} '{}' via {}", resource_type, id, method);
        let result = ctx.invoke(method, json!({ "id": id })).await?;
        if !is_success_signal(&result) {
            return Err(CimiError::Backend {
                operation: method.to_string(),
                message: format!("backend declined to delete {} '{}'", resource_type, id),
            });
        }
        Ok(())
    }

    /// Run an action; never fails, the outcome says what happened
    pub async fn perform(&self, resource_type: &str, id: &str, action: &str, ctx: &Context) -> ActionOutcome {
        let def = match self.schemas.schema_of(resource_type) {
            Ok(def) => def,
            Err(e) => return ActionOutcome::Failed(e.to_string()),
        };

        let span = tracing::info_span!("action", request = %ctx.request_id(), resource_type, action);
        dispatch::perform(def, self.schemas.vocabulary(), action, id, ctx)
            .instrument(span)
            .await
    }

    pub async fn perform_with<H: OutcomeHandler + Send + ?Sized>(
        &self,
        resource_type: &str,
        id: &str,
        action: &str,
        ctx: &Context,
        handler: &mut H,
    ) {
        self.perform(resource_type, id, action, ctx)
            .await
            .deliver(handler);
    }

    /// Attach volumes (`(href, device)` pairs) to a machine
    pub async fn attach_volumes(
        &self,
        machine_id: &str,
        volumes: &[(String, String)],
        ctx: &Context,
    ) -> Result<ResourceInstance> {
        mapper::attach_volumes(machine_id, volumes, ctx).await
    }

    pub async fn detach_volumes(
        &self,
        machine_id: &str,
        volumes: &[(String, String)],
        ctx: &Context,
    ) -> Result<ResourceInstance> {
        mapper::detach_volumes(machine_id, volumes, ctx).await
    }

    /// Entity metadata for one type, as a resource
    pub fn describe(&self, resource_type: &str, ctx: &Context) -> Result<ResourceInstance> {
        let metadata = self.metadata().describe(resource_type, ctx.driver())?;
        Ok(metadata.to_instance(ctx))
    }

    /// Entity metadata for every client-visible type
    pub fn describe_all(&self, ctx: &Context) -> Vec<EntityMetadata> {
        self.metadata().list_all(ctx.driver())
    }

    pub fn render(&self, instance: &ResourceInstance) -> Result<RenderedResource> {
        self.schemas.render(instance)
    }
}
