//! Vendor plugin interface.
//!
//! The vendor plugin owns the silicon-specific side of the DPU: it reports
//! where the bridge-port service lives and programs bridge ports and network
//! functions. Real plugins live outside this crate; [`InMemoryVendorPlugin`]
//! records calls so the daemon can run without hardware.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::bridge_port::BridgePortSpec;
use crate::config::Endpoint;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VendorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("vendor stack unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait VendorPlugin: Send + Sync {
    /// Bring the vendor stack up and return the bridge-port endpoint.
    async fn start(&self) -> Result<Endpoint, VendorError>;

    async fn create_bridge_port(&self, spec: BridgePortSpec) -> Result<BridgePortSpec, VendorError>;

    async fn delete_bridge_port(&self, name: &str) -> Result<(), VendorError>;

    async fn create_network_function(&self, input: &str, output: &str) -> Result<(), VendorError>;

    async fn delete_network_function(&self, input: &str, output: &str) -> Result<(), VendorError>;
}

/// Vendor plugin that keeps bridge ports and network functions in memory.
pub struct InMemoryVendorPlugin {
    endpoint: Endpoint,
    bridge_ports: Mutex<HashMap<String, BridgePortSpec>>,
    network_functions: Mutex<Vec<(String, String)>>,
}

impl InMemoryVendorPlugin {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            bridge_ports: Mutex::new(HashMap::new()),
            network_functions: Mutex::new(Vec::new()),
        }
    }

    pub async fn bridge_port(&self, name: &str) -> Option<BridgePortSpec> {
        self.bridge_ports.lock().await.get(name).cloned()
    }

    pub async fn bridge_port_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bridge_ports.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn network_functions(&self) -> Vec<(String, String)> {
        self.network_functions.lock().await.clone()
    }
}

#[async_trait]
impl VendorPlugin for InMemoryVendorPlugin {
    async fn start(&self) -> Result<Endpoint, VendorError> {
        info!(endpoint = %self.endpoint, "In-memory vendor plugin started");
        Ok(self.endpoint.clone())
    }

    async fn create_bridge_port(&self, spec: BridgePortSpec) -> Result<BridgePortSpec, VendorError> {
        let mut ports = self.bridge_ports.lock().await;
        if ports.contains_key(&spec.name) {
            return Err(VendorError::AlreadyExists(spec.name));
        }
        info!(name = %spec.name, mac = %spec.mac_address, bridges = ?spec.logical_bridges, "Bridge port created");
        ports.insert(spec.name.clone(), spec.clone());
        Ok(spec)
    }

    async fn delete_bridge_port(&self, name: &str) -> Result<(), VendorError> {
        match self.bridge_ports.lock().await.remove(name) {
            Some(_) => {
                info!(name, "Bridge port deleted");
                Ok(())
            }
            None => Err(VendorError::NotFound(name.to_string())),
        }
    }

    async fn create_network_function(&self, input: &str, output: &str) -> Result<(), VendorError> {
        let mut functions = self.network_functions.lock().await;
        let entry = (input.to_string(), output.to_string());
        if functions.contains(&entry) {
            return Err(VendorError::AlreadyExists(format!("{input} -> {output}")));
        }
        info!(input, output, "Network function created");
        functions.push(entry);
        Ok(())
    }

    async fn delete_network_function(&self, input: &str, output: &str) -> Result<(), VendorError> {
        let mut functions = self.network_functions.lock().await;
        let before = functions.len();
        functions.retain(|(i, o)| !(i == input && o == output));
        if functions.len() == before {
            return Err(VendorError::NotFound(format!("{input} -> {output}")));
        }
        info!(input, output, "Network function deleted");
        Ok(())
    }
}
