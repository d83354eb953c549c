//! Role-specific dataplane configuration applied for every CNI event.
//!
//! The host side hands SR-IOV virtual functions to pods; the DPU side attaches
//! network-function interfaces. Both only track ownership here: the hardware
//! primitives behind them belong to the vendor stack.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cni::{CniResult, PodNetworkRequest};

#[derive(Debug, Error)]
pub enum DataplaneError {
    #[error("VF {vf} is in use by {netns}")]
    VfInUse { vf: u32, netns: String },

    #[error("VF {vf} already attached in {netns}")]
    AlreadyAttached { netns: String, vf: u32 },

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait DataplaneConfigurator: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Set up the interface described by `request`.
    async fn cmd_add(&self, request: &PodNetworkRequest) -> Result<CniResult, DataplaneError>;

    /// Tear it down again. Tearing down something unknown is not an error.
    async fn cmd_del(&self, request: &PodNetworkRequest) -> Result<(), DataplaneError>;
}

/// Host side: moves a VF into the pod namespace.
#[derive(Default)]
pub struct SriovVfConfigurator {
    /// VF index -> owning network namespace.
    owners: Mutex<HashMap<u32, String>>,
}

impl SriovVfConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn owner(&self, vf: u32) -> Option<String> {
        self.owners.lock().await.get(&vf).cloned()
    }
}

#[async_trait]
impl DataplaneConfigurator for SriovVfConfigurator {
    fn kind(&self) -> &'static str {
        "sriov"
    }

    async fn cmd_add(&self, request: &PodNetworkRequest) -> Result<CniResult, DataplaneError> {
        let vf = request.config.vf_index;
        let mut owners = self.owners.lock().await;
        match owners.get(&vf) {
            Some(owner) if owner != &request.netns => {
                return Err(DataplaneError::VfInUse {
                    vf,
                    netns: owner.clone(),
                });
            }
            Some(_) => debug!(vf, netns = %request.netns, "VF already in namespace"),
            None => {
                info!(vf, netns = %request.netns, if_name = %request.if_name, "VF moved into pod");
                owners.insert(vf, request.netns.clone());
            }
        }
        Ok(CniResult::for_request(request))
    }

    async fn cmd_del(&self, request: &PodNetworkRequest) -> Result<(), DataplaneError> {
        let vf = request.config.vf_index;
        let mut owners = self.owners.lock().await;
        if owners.get(&vf) == Some(&request.netns) {
            owners.remove(&vf);
            info!(vf, netns = %request.netns, "VF released");
        }
        Ok(())
    }
}

/// DPU side: attaches a network-function interface.
///
/// Each side of a network function is its own VF, so attachments are keyed
/// by (netns, VF index). The interface name is not part of the key; CNI
/// requests may leave it at its default.
#[derive(Default)]
pub struct NetworkFunctionConfigurator {
    attached: Mutex<HashSet<(String, u32)>>,
}

impl NetworkFunctionConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attachments(&self) -> usize {
        self.attached.lock().await.len()
    }
}

#[async_trait]
impl DataplaneConfigurator for NetworkFunctionConfigurator {
    fn kind(&self) -> &'static str {
        "network-function"
    }

    async fn cmd_add(&self, request: &PodNetworkRequest) -> Result<CniResult, DataplaneError> {
        let vf = request.config.vf_index;
        if !self.attached.lock().await.insert((request.netns.clone(), vf)) {
            return Err(DataplaneError::AlreadyAttached {
                netns: request.netns.clone(),
                vf,
            });
        }
        info!(netns = %request.netns, vf, if_name = %request.if_name, "Network function interface attached");
        Ok(CniResult::for_request(request))
    }

    async fn cmd_del(&self, request: &PodNetworkRequest) -> Result<(), DataplaneError> {
        let vf = request.config.vf_index;
        if self.attached.lock().await.remove(&(request.netns.clone(), vf)) {
            info!(netns = %request.netns, vf, "Network function interface detached");
        }
        Ok(())
    }
}
