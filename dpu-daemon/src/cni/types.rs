//! Wire types exchanged between the CNI shim and the daemon.

use serde::{Deserialize, Serialize};

use crate::mac::MacAddress;

/// CNI spec version reported in results.
pub const CNI_VERSION: &str = "1.0.0";

/// Default interface name inside the pod.
pub const DEFAULT_IF_NAME: &str = "net1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CniCommand {
    Add,
    Del,
}

/// Per-interface configuration carried by a pod request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceConfig {
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub vf_index: u32,
}

/// One CNI ADD/DEL invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodNetworkRequest {
    pub command: CniCommand,
    #[serde(default)]
    pub container_id: String,
    /// Network namespace path; the MAC-pair key.
    pub netns: String,
    #[serde(default = "default_if_name")]
    pub if_name: String,
    #[serde(default)]
    pub config: InterfaceConfig,
}

fn default_if_name() -> String {
    DEFAULT_IF_NAME.to_string()
}

impl PodNetworkRequest {
    pub fn add(netns: impl Into<String>, mac: impl Into<String>, vf_index: u32) -> Self {
        Self {
            command: CniCommand::Add,
            container_id: String::new(),
            netns: netns.into(),
            if_name: default_if_name(),
            config: InterfaceConfig {
                mac: mac.into(),
                vf_index,
            },
        }
    }

    pub fn del(netns: impl Into<String>, vf_index: u32) -> Self {
        Self {
            command: CniCommand::Del,
            container_id: String::new(),
            netns: netns.into(),
            if_name: default_if_name(),
            config: InterfaceConfig {
                mac: String::new(),
                vf_index,
            },
        }
    }

    pub fn with_if_name(mut self, if_name: impl Into<String>) -> Self {
        self.if_name = if_name.into();
        self
    }

    /// Parsed interface MAC, if one was supplied.
    pub fn mac(&self) -> Option<MacAddress> {
        self.config.mac.parse().ok()
    }

    /// Checks the fields a command needs. ADD requires a valid MAC; DEL only
    /// the namespace.
    pub fn validate(&self) -> Result<(), String> {
        if self.netns.trim().is_empty() {
            return Err("netns is required".to_string());
        }
        if self.command == CniCommand::Add {
            self.config
                .mac
                .parse::<MacAddress>()
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniInterface {
    pub name: String,
    pub mac: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

/// Result returned for a successful ADD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    pub cni_version: String,
    pub interfaces: Vec<CniInterface>,
}

impl CniResult {
    /// Result describing the single interface a request attached.
    pub fn for_request(request: &PodNetworkRequest) -> Self {
        let mac = request
            .mac()
            .map(|m| m.to_string())
            .unwrap_or_else(|| request.config.mac.clone());
        Self {
            cni_version: CNI_VERSION.to_string(),
            interfaces: vec![CniInterface {
                name: request.if_name.clone(),
                mac,
                sandbox: request.netns.clone(),
            }],
        }
    }
}
