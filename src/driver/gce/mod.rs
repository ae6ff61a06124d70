//! Google Compute Engine driver
//!
//! Serves machines, machine configurations (machine types), images and
//! networks from one project and zone. Operation names map to Compute
//! Engine REST calls; GCE resources are addressed by name, so the backend
//! identifier of every object is its GCE name.
//!
//! - [`auth`] - bearer tokens (ADC or fixed)
//! - [`client`] - project/zone scoped REST client
//! - [`http`] - request plumbing and API errors

pub mod auth;
pub mod client;
pub mod http;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{id_param, Credentials, Driver, OperationSet};
use crate::domain::{HardwareProfile, Image, Instance, InstanceProfile, Network};
use client::GceClient;

const OPERATIONS: &[&str] = &[
    "instances",
    "instance",
    "create_instance",
    "start_instance",
    "stop_instance",
    "reboot_instance",
    "destroy_instance",
    "hardware_profiles",
    "hardware_profile",
    "images",
    "image",
    "networks",
    "network",
];

pub struct GceDriver {
    client: GceClient,
}

impl GceDriver {
    /// Driver authenticated through Application Default Credentials
    pub async fn connect(project_id: &str, zone: &str) -> Result<Self> {
        Ok(Self::with_client(GceClient::new(project_id, zone).await?))
    }

    pub fn with_client(client: GceClient) -> Self {
        Self { client }
    }

    /// GET a single resource; a 404 is `null`
    async fn lookup(&self, url: &str) -> Result<Option<Value>> {
        match self.client.get(url).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if http::is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every `items` entry across pages
    async fn list_all(&self, url: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page_url = match &page_token {
                Some(token) => format!("{}?pageToken={}", url, urlencoding::encode(token)),
                None => url.to_string(),
            };
            let mut response = self.client.get(&page_url).await?;
            if let Some(Value::Array(page)) = response.get_mut("items").map(Value::take) {
                items.extend(page);
            }
            page_token = response
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if page_token.is_none() {
                return Ok(items);
            }
        }
    }

    async fn list_as<F>(&self, url: &str, convert: F) -> Result<Value>
    where
        F: Fn(&Value) -> Result<Value>,
    {
        let items = self.list_all(url).await?;
        items
            .iter()
            .map(convert)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array)
    }

    async fn lookup_as<F>(&self, url: &str, convert: F) -> Result<Value>
    where
        F: Fn(&Value) -> Result<Value>,
    {
        match self.lookup(url).await? {
            Some(item) => convert(&item),
            None => Ok(Value::Null),
        }
    }

    async fn instance_action(&self, id: &str, verb: &str) -> Result<Value> {
        let url = self
            .client
            .compute_zonal_url(&format!("instances/{}/{}", urlencoding::encode(id), verb));
        tracing::info!("GCE {} on instance {}", verb, id);
        self.client.post(&url, None).await?;
        Ok(json!(true))
    }

    async fn create_instance(&self, params: &Value) -> Result<Value> {
        let image_id = str_param(params, "image_id").context("image_id is required")?;
        let hwp_id = str_param(params, "hwp_id").context("hwp_id is required")?;
        if let Some(keyname) = str_param(params, "keyname") {
            bail!("GCE has no key pair '{}' to attach", keyname);
        }
        let name = match str_param(params, "name") {
            Some(name) => name.to_string(),
            None => format!("cimi-{}", uuid::Uuid::new_v4().simple()),
        };

        let body = json!({
            "name": name,
            "description": str_param(params, "description").unwrap_or_default(),
            "machineType": format!("zones/{}/machineTypes/{}", self.client.zone, hwp_id),
            "disks": [{
                "boot": true,
                "autoDelete": true,
                "initializeParams": {
                    "sourceImage": format!("projects/{}/global/images/{}", self.client.project_id, image_id)
                }
            }],
            "networkInterfaces": [{ "network": "global/networks/default" }]
        });
        self.client
            .post(&self.client.compute_zonal_url("instances"), Some(&body))
            .await?;

        let instance = Instance {
            id: name.clone(),
            name: Some(name),
            state: "PENDING".to_string(),
            launch_time: Some(Utc::now()),
            image_id: image_id.to_string(),
            keyname: None,
            instance_profile: InstanceProfile {
                id: hwp_id.to_string(),
                name: None,
                overrides: Default::default(),
            },
            actions: Vec::new(),
            storage_volumes: Vec::new(),
            public_addresses: Vec::new(),
            private_addresses: Vec::new(),
        };
        Ok(serde_json::to_value(instance)?)
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Last path segment of a GCE resource URL
fn short_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// GCE instance status in the provider vocabulary every driver shares
pub fn instance_state(status: &str) -> &str {
    match status {
        "PROVISIONING" | "STAGING" => "PENDING",
        "STOPPING" | "SUSPENDING" => "STOPPING",
        "TERMINATED" | "STOPPED" | "SUSPENDED" => "STOPPED",
        other => other,
    }
}

fn instance_actions(state: &str) -> Vec<String> {
    let actions: &[&str] = match state {
        "RUNNING" => &["stop", "reboot"],
        "STOPPED" => &["start", "delete"],
        _ => &[],
    };
    actions.iter().map(|a| a.to_string()).collect()
}

fn to_instance(item: &Value) -> Result<Value> {
    let name = item
        .get("name")
        .and_then(Value::as_str)
        .context("GCE instance without a name")?;
    let state = instance_state(item.get("status").and_then(Value::as_str).unwrap_or("UNKNOWN"));
    let interfaces = item
        .get("networkInterfaces")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let instance = Instance {
        id: name.to_string(),
        name: item
            .get("description")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        state: state.to_string(),
        launch_time: item
            .get("creationTimestamp")
            .and_then(Value::as_str)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc)),
        image_id: item
            .pointer("/disks/0/source")
            .and_then(Value::as_str)
            .map(short_name)
            .unwrap_or_default()
            .to_string(),
        keyname: None,
        instance_profile: InstanceProfile {
            id: item
                .get("machineType")
                .and_then(Value::as_str)
                .map(short_name)
                .unwrap_or_default()
                .to_string(),
            name: None,
            overrides: Default::default(),
        },
        actions: instance_actions(state),
        storage_volumes: Vec::new(),
        public_addresses: interfaces
            .iter()
            .filter_map(|nic| nic.pointer("/accessConfigs/0/natIP").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        private_addresses: interfaces
            .iter()
            .filter_map(|nic| nic.get("networkIP").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
    };
    Ok(serde_json::to_value(instance)?)
}

fn to_hardware_profile(item: &Value) -> Result<Value> {
    let name = item
        .get("name")
        .and_then(Value::as_str)
        .context("GCE machine type without a name")?;
    let profile = HardwareProfile {
        id: name.to_string(),
        name: Some(name.to_string()),
        cpu: item
            .get("guestCpus")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok()),
        memory: item.get("memoryMb").and_then(Value::as_u64),
    };
    Ok(serde_json::to_value(profile)?)
}

fn to_image(item: &Value) -> Result<Value> {
    let name = item
        .get("name")
        .and_then(Value::as_str)
        .context("GCE image without a name")?;
    let image = Image {
        id: name.to_string(),
        name: Some(name.to_string()),
        description: item.get("description").and_then(Value::as_str).map(str::to_string),
        architecture: item.get("architecture").and_then(Value::as_str).map(str::to_string),
        state: item.get("status").and_then(Value::as_str).map(str::to_string),
    };
    Ok(serde_json::to_value(image)?)
}

fn to_network(item: &Value) -> Result<Value> {
    let name = item
        .get("name")
        .and_then(Value::as_str)
        .context("GCE network without a name")?;
    let network = Network {
        id: name.to_string(),
        name: Some(name.to_string()),
        description: item.get("description").and_then(Value::as_str).map(str::to_string),
        state: Some("STARTED".to_string()),
        address_blocks: item
            .get("IPv4Range")
            .and_then(Value::as_str)
            .map(|range| vec![range.to_string()])
            .unwrap_or_default(),
    };
    Ok(serde_json::to_value(network)?)
}

#[async_trait]
impl Driver for GceDriver {
    fn name(&self) -> &str {
        "gce"
    }

    fn operations(&self) -> OperationSet {
        OPERATIONS.iter().copied().collect()
    }

    async fn invoke(&self, _credentials: &Credentials, method: &str, params: &Value) -> Result<Value> {
        tracing::debug!("gce: method={}, project={}, zone={}", method, self.client.project_id, self.client.zone);

        match method {
            "instances" => {
                self.list_as(&self.client.compute_zonal_url("instances"), to_instance)
                    .await
            },
            "instance" => {
                let url = self
                    .client
                    .compute_zonal_url(&format!("instances/{}", urlencoding::encode(id_param(params)?)));
                self.lookup_as(&url, to_instance).await
            },
            "create_instance" => self.create_instance(params).await,
            "start_instance" => self.instance_action(id_param(params)?, "start").await,
            "stop_instance" => self.instance_action(id_param(params)?, "stop").await,
            "reboot_instance" => self.instance_action(id_param(params)?, "reset").await,
            "destroy_instance" => {
                let id = id_param(params)?;
                let url = self
                    .client
                    .compute_zonal_url(&format!("instances/{}", urlencoding::encode(id)));
                tracing::info!("GCE delete on instance {}", id);
                self.client.delete(&url).await?;
                Ok(json!(true))
            },
            "hardware_profiles" => {
                self.list_as(&self.client.compute_zonal_url("machineTypes"), to_hardware_profile)
                    .await
            },
            "hardware_profile" => {
                let url = self.client.compute_zonal_url(&format!(
                    "machineTypes/{}",
                    urlencoding::encode(id_param(params)?)
                ));
                self.lookup_as(&url, to_hardware_profile).await
            },
            "images" => {
                self.list_as(&self.client.compute_global_url("images"), to_image)
                    .await
            },
            "image" => {
                let url = self
                    .client
                    .compute_global_url(&format!("images/{}", urlencoding::encode(id_param(params)?)));
                self.lookup_as(&url, to_image).await
            },
            "networks" => {
                self.list_as(&self.client.compute_global_url("networks"), to_network)
                    .await
            },
            "network" => {
                let url = self
                    .client
                    .compute_global_url(&format!("networks/{}", urlencoding::encode(id_param(params)?)));
                self.lookup_as(&url, to_network).await
            },
            _ => Err(anyhow::anyhow!("Unknown GCE operation: {}", method)),
        }
    }
}
