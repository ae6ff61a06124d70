//! In-memory driver
//!
//! Serves a small fixed cloud (see `fixtures.json`) and keeps every change
//! in memory for the lifetime of the driver. Useful for tests and for
//! trying the engine without credentials.

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::{id_param, Credentials, Driver, OperationSet};
use crate::domain::{
    HardwareProfile, Image, Instance, InstanceProfile, Key, Network, NetworkPort,
    NetworkPortConfig, NetworkPortTemplate, StorageVolume, VolumeAttachment,
};

const FIXTURES: &str = include_str!("fixtures.json");

/// Every operation the mock understands
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
    "keys",
    "key",
    "storage_volumes",
    "storage_volume",
    "attach_storage_volume",
    "detach_storage_volume",
    "networks",
    "network",
    "network_port_configs",
    "network_port_config",
    "network_port_templates",
    "network_port_template",
    "network_ports",
    "network_port",
    "create_network_port",
    "delete_network_port",
    "start_network_port",
    "stop_network_port",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MockState {
    instances: Vec<Instance>,
    hardware_profiles: Vec<HardwareProfile>,
    images: Vec<Image>,
    keys: Vec<Key>,
    storage_volumes: Vec<StorageVolume>,
    networks: Vec<Network>,
    network_port_configs: Vec<NetworkPortConfig>,
    network_port_templates: Vec<NetworkPortTemplate>,
    network_ports: Vec<NetworkPort>,
    #[serde(skip)]
    next_id: u64,
    #[serde(skip)]
    calls: Vec<String>,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, 100 + self.next_id)
    }

    fn instance_mut(&mut self, id: &str) -> Result<&mut Instance> {
        self.instances
            .iter_mut()
            .find(|i| i.id == id)
            .with_context(|| format!("Instance '{}' does not exist", id))
    }

    fn port_mut(&mut self, id: &str) -> Result<&mut NetworkPort> {
        self.network_ports
            .iter_mut()
            .find(|p| p.id == id)
            .with_context(|| format!("Network port '{}' does not exist", id))
    }
}

/// Actions an instance allows in a given state
fn instance_actions(state: &str) -> Vec<String> {
    let actions: &[&str] = match state {
        "RUNNING" => &["reboot", "stop"],
        "STOPPED" => &["start", "delete"],
        _ => &[],
    };
    actions.iter().map(|a| a.to_string()).collect()
}

fn port_actions(state: &str) -> Vec<String> {
    let actions: &[&str] = match state {
        "RUNNING" => &["stop"],
        "STOPPED" => &["start", "delete"],
        _ => &[],
    };
    actions.iter().map(|a| a.to_string()).collect()
}

fn to_value<T: Serialize>(item: &T) -> Result<Value> {
    serde_json::to_value(item).context("Failed to serialize mock object")
}

fn list<T: Serialize>(items: &[T]) -> Result<Value> {
    serde_json::to_value(items).context("Failed to serialize mock objects")
}

/// Lookup convention: `null` when absent
fn lookup<T: Serialize>(items: &[T], id: &str, id_of: impl Fn(&T) -> &str) -> Result<Value> {
    match items.iter().find(|item| id_of(item) == id) {
        Some(item) => to_value(item),
        None => Ok(Value::Null),
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub struct MockDriver {
    state: RwLock<MockState>,
    operations: OperationSet,
}

impl MockDriver {
    pub fn new() -> Self {
        let state: MockState = serde_json::from_str(FIXTURES)
            .unwrap_or_else(|e| panic!("Failed to load mock fixtures: {}", e));

        Self {
            state: RwLock::new(state),
            operations: OPERATIONS.iter().copied().collect(),
        }
    }

    /// Same cloud, minus some operations (simulates a less capable backend)
    pub fn without_operations(mut self, operations: &[&str]) -> Self {
        for op in operations {
            self.operations.remove(op);
        }
        self
    }

    /// Operations invoked so far, in order
    pub async fn calls(&self) -> Vec<String> {
        self.state.read().await.calls.clone()
    }

    fn instance_view(instance: &Instance) -> Result<Value> {
        let mut instance = instance.clone();
        instance.actions = instance_actions(&instance.state);
        to_value(&instance)
    }

    fn port_view(port: &NetworkPort) -> Result<Value> {
        let mut port = port.clone();
        port.actions = port_actions(&port.state);
        to_value(&port)
    }

    fn dispatch(state: &mut MockState, method: &str, params: &Value) -> Result<Value> {
        match method {
            "instances" => state
                .instances
                .iter()
                .map(Self::instance_view)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            "instance" => {
                let id = id_param(params)?;
                match state.instances.iter().find(|i| i.id == id) {
                    Some(instance) => Self::instance_view(instance),
                    None => Ok(Value::Null),
                }
            },
            "create_instance" => {
                let image_id = str_param(params, "image_id").context("image_id is required")?;
                let hwp_id = str_param(params, "hwp_id").context("hwp_id is required")?;
                if !state.images.iter().any(|i| i.id == image_id) {
                    bail!("Image '{}' does not exist", image_id);
                }
                if !state.hardware_profiles.iter().any(|p| p.id == hwp_id) {
                    bail!("Hardware profile '{}' does not exist", hwp_id);
                }
                if let Some(key) = str_param(params, "keyname") {
                    if !state.keys.iter().any(|k| k.id == key) {
                        bail!("Key '{}' does not exist", key);
                    }
                }

                let instance = Instance {
                    id: state.next_id("inst"),
                    name: str_param(params, "name").map(str::to_string),
                    state: "PENDING".to_string(),
                    launch_time: Some(chrono::Utc::now()),
                    image_id: image_id.to_string(),
                    keyname: str_param(params, "keyname").map(str::to_string),
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
                let view = Self::instance_view(&instance);
                state.instances.push(instance);
                view
            },
            "start_instance" => {
                let instance = state.instance_mut(id_param(params)?)?;
                Ok(json!(transition(&mut instance.state, "STOPPED", "RUNNING")))
            },
            "stop_instance" => {
                let instance = state.instance_mut(id_param(params)?)?;
                Ok(json!(transition(&mut instance.state, "RUNNING", "STOPPED")))
            },
            "reboot_instance" => {
                let instance = state.instance_mut(id_param(params)?)?;
                Ok(json!(instance.state == "RUNNING"))
            },
            "destroy_instance" => {
                let id = id_param(params)?;
                if state.instance_mut(id)?.state != "STOPPED" {
                    return Ok(json!(false));
                }
                state.instances.retain(|i| i.id != id);
                Ok(json!(true))
            },
            "hardware_profiles" => list(&state.hardware_profiles),
            "hardware_profile" => lookup(&state.hardware_profiles, id_param(params)?, |p| p.id.as_str()),
            "images" => list(&state.images),
            "image" => lookup(&state.images, id_param(params)?, |i| i.id.as_str()),
            "keys" => list(&state.keys),
            "key" => lookup(&state.keys, id_param(params)?, |k| k.id.as_str()),
            "storage_volumes" => list(&state.storage_volumes),
            "storage_volume" => lookup(&state.storage_volumes, id_param(params)?, |v| v.id.as_str()),
            "attach_storage_volume" | "detach_storage_volume" => {
                let volume_id = id_param(params)?;
                let instance_id =
                    str_param(params, "instance_id").context("instance_id is required")?;
                let device = str_param(params, "device").map(str::to_string);
                let attach = method == "attach_storage_volume";

                let instance = state.instance_mut(instance_id)?;
                instance.storage_volumes.retain(|a| a.volume_id != volume_id);
                if attach {
                    instance.storage_volumes.push(VolumeAttachment {
                        volume_id: volume_id.to_string(),
                        device: device.clone(),
                    });
                }

                let volume = state
                    .storage_volumes
                    .iter_mut()
                    .find(|v| v.id == volume_id)
                    .with_context(|| format!("Volume '{}' does not exist", volume_id))?;
                if attach {
                    volume.instance_id = Some(instance_id.to_string());
                    volume.device = device;
                    volume.state = Some("IN-USE".to_string());
                } else {
                    volume.instance_id = None;
                    volume.device = None;
                    volume.state = Some("AVAILABLE".to_string());
                }
                to_value(volume)
            },
            "networks" => list(&state.networks),
            "network" => lookup(&state.networks, id_param(params)?, |n| n.id.as_str()),
            "network_port_configs" => list(&state.network_port_configs),
            "network_port_config" => {
                lookup(&state.network_port_configs, id_param(params)?, |c| c.id.as_str())
            },
            "network_port_templates" => list(&state.network_port_templates),
            "network_port_template" => {
                lookup(&state.network_port_templates, id_param(params)?, |t| t.id.as_str())
            },
            "network_ports" => state
                .network_ports
                .iter()
                .map(Self::port_view)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            "network_port" => {
                let id = id_param(params)?;
                match state.network_ports.iter().find(|p| p.id == id) {
                    Some(port) => Self::port_view(port),
                    None => Ok(Value::Null),
                }
            },
            "create_network_port" => {
                let network = str_param(params, "network").context("network is required")?;
                if !state.networks.iter().any(|n| n.id == network) {
                    bail!("Network '{}' does not exist", network);
                }
                let config = params
                    .get("network_port_config")
                    .filter(|c| c.is_object())
                    .context("network_port_config is required")?;

                let port = NetworkPort {
                    id: state.next_id("np"),
                    name: str_param(params, "name").map(str::to_string),
                    description: str_param(params, "description").map(str::to_string),
                    state: "STOPPED".to_string(),
                    network: network.to_string(),
                    port_type: str_param(config, "port_type").map(str::to_string),
                    class_of_service: str_param(config, "class_of_service").map(str::to_string),
                    created: Some(chrono::Utc::now()),
                    actions: Vec::new(),
                };
                let view = Self::port_view(&port);
                state.network_ports.push(port);
                view
            },
            "delete_network_port" => {
                let id = id_param(params)?;
                if state.port_mut(id)?.state != "STOPPED" {
                    return Ok(json!(false));
                }
                state.network_ports.retain(|p| p.id != id);
                Ok(json!(true))
            },
            "start_network_port" => {
                let port = state.port_mut(id_param(params)?)?;
                Ok(json!(transition(&mut port.state, "STOPPED", "RUNNING")))
            },
            "stop_network_port" => {
                let port = state.port_mut(id_param(params)?)?;
                Ok(json!(transition(&mut port.state, "RUNNING", "STOPPED")))
            },
            _ => bail!("Unknown mock operation: {}", method),
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Move `state` from `from` to `to`; false when it is not in `from`
fn transition(state: &mut String, from: &str, to: &str) -> bool {
    if *state != from {
        return false;
    }
    *state = to.to_string();
    true
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn operations(&self) -> OperationSet {
        self.operations.clone()
    }

    async fn invoke(&self, _credentials: &Credentials, method: &str, params: &Value) -> Result<Value> {
        if !self.operations.contains(method) {
            bail!("Unknown mock operation: {}", method);
        }

        let mut state = self.state.write().await;
        state.calls.push(method.to_string());
        tracing::trace!("mock: {} {}", method, params);
        Self::dispatch(&mut state, method, params)
    }
}
