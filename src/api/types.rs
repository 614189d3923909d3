//! Request and response records for the orchestration API.
//!
//! Responses carry many more fields than we use; unknown fields are ignored.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub netblock: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Hypervisor the instance runs on; its console is served there.
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub console_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    #[serde(default)]
    pub uuid: Option<String>,
    pub network_uuid: String,
    pub ipv4: String,
    #[serde(default)]
    pub macaddr: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSpec {
    pub netblock: String,
    pub provide_dhcp: bool,
    pub provide_nat: bool,
    pub name: String,
}

/// One NIC of a new instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NicSpec {
    pub network_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskSpec {
    /// Gigabytes.
    pub size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl DiskSpec {
    pub fn from_image(size: u32, base: &str) -> Self {
        Self {
            size,
            base: Some(base.to_string()),
            kind: "disk".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSpec {
    pub name: String,
    pub cpus: u32,
    /// Megabytes.
    pub memory: u32,
    pub network: Vec<NicSpec>,
    pub disk: Vec<DiskSpec>,
    pub ssh_key: Option<String>,
    pub user_data: Option<String>,
}

/// `GET /auth/namespaces` has returned both bare names and records.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum NamespaceEntry {
    Name(String),
    Record { name: String },
}

impl NamespaceEntry {
    pub(crate) fn into_name(self) -> String {
        match self {
            Self::Name(name) | Self::Record { name } => name,
        }
    }
}
