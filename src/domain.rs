//! Backend domain objects
//!
//! These are the shapes drivers hand back through [`crate::driver::Driver::invoke`].
//! They describe what a provider knows about its resources, in the
//! provider's vocabulary (`RUNNING`, `reboot`, hardware profiles in MB),
//! before any translation into CIMI resources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Profile identifier of instances whose size the provider does not expose
pub const OPAQUE_PROFILE: &str = "opaque";

/// A compute instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub state: String,
    #[serde(default)]
    pub launch_time: Option<DateTime<Utc>>,
    pub image_id: String,
    #[serde(default)]
    pub keyname: Option<String>,
    pub instance_profile: InstanceProfile,
    /// Actions the provider allows in the current state
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub storage_volumes: Vec<VolumeAttachment>,
    #[serde(default)]
    pub public_addresses: Vec<String>,
    #[serde(default)]
    pub private_addresses: Vec<String>,
}

/// Hardware profile attached to an instance, with per-instance overrides
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// e.g. `cpu` -> `"4"`, `memory` -> `"8192"` (MB)
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

impl InstanceProfile {
    pub fn is_opaque(&self) -> bool {
        self.id == OPAQUE_PROFILE
    }
}

/// Volume attached to an instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeAttachment {
    pub volume_id: String,
    #[serde(default)]
    pub device: Option<String>,
}

/// Hardware profile (a machine size)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HardwareProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cpu: Option<u32>,
    /// Memory in MB
    #[serde(default)]
    pub memory: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Key pair usable as a machine credential
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Key {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageVolume {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Capacity in GB
    #[serde(default)]
    pub capacity: Option<u64>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub address_blocks: Vec<String>,
}

/// Port on a virtual switch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkPort {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub state: String,
    /// Backend id of the owning network
    pub network: String,
    #[serde(default)]
    pub port_type: Option<String>,
    #[serde(default)]
    pub class_of_service: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkPortConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub port_type: Option<String>,
    #[serde(default)]
    pub class_of_service: Option<String>,
    #[serde(default)]
    pub traffic_priority: Option<u32>,
    #[serde(default)]
    pub max_transmission_unit: Option<u32>,
}

/// Network plus port configuration, by backend id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkPortTemplate {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub network: String,
    pub network_port_config: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instance_defaults_optional_fields() {
        let instance: Instance = serde_json::from_value(json!({
            "id": "inst0",
            "state": "RUNNING",
            "image_id": "img1",
            "instance_profile": {"id": "m1-small"}
        }))
        .unwrap();

        assert!(instance.actions.is_empty());
        assert!(instance.keyname.is_none());
        assert!(instance.instance_profile.overrides.is_empty());
        assert!(!instance.instance_profile.is_opaque());
    }
}
