//! Typed payloads for the MAAS region API.
//!
//! MAAS responses carry many more fields than the gateway uses; unknown
//! fields are ignored and most known ones default so that older regions
//! still deserialize.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Machine {
    pub system_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub status_name: String,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub cpu_count: u32,
    /// Megabytes.
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub power_state: String,
    #[serde(default)]
    pub osystem: String,
    #[serde(default)]
    pub distro_series: String,
    #[serde(default)]
    pub tag_names: Vec<String>,
    #[serde(default)]
    pub zone: Option<Zone>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subnet {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub cidr: String,
    #[serde(default)]
    pub gateway_ip: Option<String>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub vlan: Option<Vlan>,
    #[serde(default)]
    pub managed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vlan {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fabric: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub kernel_opts: Option<String>,
}

/// Acknowledgement for an uploaded commissioning/testing script.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    pub name: String,
    #[serde(default)]
    pub script_type: Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Constraints for machine allocation. `None` fields are omitted.
#[derive(Debug, Clone, Default)]
pub struct AllocateParams {
    pub hostname: Option<String>,
    pub architecture: Option<String>,
    pub min_cpu_count: Option<u32>,
    /// Megabytes.
    pub min_memory: Option<u64>,
    pub tags: Vec<String>,
    pub zone: Option<String>,
}

impl AllocateParams {
    pub(crate) fn to_form_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(hostname) = &self.hostname {
            params.push(("name", hostname.clone()));
        }
        if let Some(arch) = &self.architecture {
            params.push(("arch", arch.clone()));
        }
        if let Some(cpu) = self.min_cpu_count {
            params.push(("cpu_count", cpu.to_string()));
        }
        if let Some(mem) = self.min_memory {
            params.push(("mem", mem.to_string()));
        }
        for tag in &self.tags {
            params.push(("tags", tag.clone()));
        }
        if let Some(zone) = &self.zone {
            params.push(("zone", zone.clone()));
        }
        params
    }
}

/// Options for a deployment. `None` fields use the region defaults.
#[derive(Debug, Clone, Default)]
pub struct DeployParams {
    pub osystem: Option<String>,
    pub distro_series: Option<String>,
    pub hwe_kernel: Option<String>,
    pub user_data: Option<String>,
}

impl DeployParams {
    pub(crate) fn to_form_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(osystem) = &self.osystem {
            params.push(("osystem", osystem.clone()));
        }
        if let Some(series) = &self.distro_series {
            params.push(("distro_series", series.clone()));
        }
        if let Some(kernel) = &self.hwe_kernel {
            params.push(("hwe_kernel", kernel.clone()));
        }
        if let Some(user_data) = &self.user_data {
            params.push(("user_data", user_data.clone()));
        }
        params
    }
}
