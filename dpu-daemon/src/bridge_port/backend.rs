//! Where completed MAC pairs are turned into dataplane state.
//!
//! The DPU-side daemon programs the vendor plugin directly
//! ([`LocalBackend`]); the host-side daemon asks its DPU-side peer to do it
//! over gRPC ([`RemoteBackend`]).

use std::sync::Arc;

use async_trait::async_trait;
use dpu_api::BridgePortServiceClient;
use dpu_api::proto::{CreateBridgePortRequest, DeleteBridgePortRequest};
use thiserror::Error;
use tonic::transport::Channel;
use tracing::info;

use super::spec::{BridgePortSpec, HOST_PF};
use crate::cni::PodNetworkRequest;
use crate::connector::{Dial, RetryingConnector, TonicDial};
use crate::correlator::MacPair;
use crate::mac::InvalidMac;
use crate::plugin::{VendorError, VendorPlugin};
use crate::retry::RetryError;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("vendor plugin: {0}")]
    Vendor(#[from] VendorError),

    #[error("bridge-port RPC: {0}")]
    Rpc(#[from] RetryError),

    #[error(transparent)]
    InvalidMac(#[from] InvalidMac),
}

#[async_trait]
pub trait BridgePortBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn create(&self, pair: &MacPair, request: &PodNetworkRequest) -> Result<(), BackendError>;

    async fn delete(&self, pair: &MacPair, request: &PodNetworkRequest) -> Result<(), BackendError>;
}

/// Applies pairs in-process as vendor network functions.
pub struct LocalBackend {
    vendor: Arc<dyn VendorPlugin>,
}

impl LocalBackend {
    pub fn new(vendor: Arc<dyn VendorPlugin>) -> Self {
        Self { vendor }
    }
}

#[async_trait]
impl BridgePortBackend for LocalBackend {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn create(&self, pair: &MacPair, _request: &PodNetworkRequest) -> Result<(), BackendError> {
        self.vendor
            .create_network_function(&pair.first, &pair.second)
            .await?;
        Ok(())
    }

    async fn delete(&self, pair: &MacPair, _request: &PodNetworkRequest) -> Result<(), BackendError> {
        self.vendor
            .delete_network_function(&pair.first, &pair.second)
            .await?;
        Ok(())
    }
}

/// Delegates bridge-port changes to the DPU-side daemon.
pub struct RemoteBackend<D: Dial = TonicDial> {
    connector: RetryingConnector<D>,
}

impl<D: Dial> RemoteBackend<D> {
    pub fn new(connector: RetryingConnector<D>) -> Self {
        Self { connector }
    }

    /// Spec for the VF named in the request, bound to the pair's first MAC.
    fn spec_for(pair: &MacPair, request: &PodNetworkRequest) -> Result<BridgePortSpec, BackendError> {
        let mac = pair.first.parse()?;
        Ok(BridgePortSpec::for_vf(HOST_PF, request.config.vf_index, mac))
    }
}

#[async_trait]
impl<D> BridgePortBackend for RemoteBackend<D>
where
    D: Dial<Client = BridgePortServiceClient<Channel>>,
{
    fn kind(&self) -> &'static str {
        "remote"
    }

    async fn create(&self, pair: &MacPair, request: &PodNetworkRequest) -> Result<(), BackendError> {
        let spec = Self::spec_for(pair, request)?;
        info!(
            name = %spec.name,
            mac = %spec.mac_address,
            bridges = ?spec.logical_bridges,
            endpoint = %self.connector.endpoint(),
            "CreateBridgePort"
        );

        let bridge_port = dpu_api::proto::BridgePort::from(&spec);
        self.connector
            .call("CreateBridgePort", |mut client| {
                let request = CreateBridgePortRequest {
                    bridge_port_id: bridge_port.name.clone(),
                    bridge_port: Some(bridge_port.clone()),
                };
                async move { client.create_bridge_port(request).await }
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, _pair: &MacPair, request: &PodNetworkRequest) -> Result<(), BackendError> {
        let name = BridgePortSpec::port_name(HOST_PF, request.config.vf_index);
        info!(name = %name, endpoint = %self.connector.endpoint(), "DeleteBridgePort");

        self.connector
            .call("DeleteBridgePort", |mut client| {
                let request = DeleteBridgePortRequest {
                    name: name.clone(),
                    allow_missing: false,
                };
                async move { client.delete_bridge_port(request).await }
            })
            .await?;
        Ok(())
    }
}
