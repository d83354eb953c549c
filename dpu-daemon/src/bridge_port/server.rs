//! gRPC server subsystem for the bridge-port service.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dpu_api::BridgePortServiceServer;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

use super::service::BridgePortServiceImpl;
use crate::config::Endpoint;
use crate::error::{DaemonError, Result};
use crate::plugin::VendorPlugin;
use crate::supervisor::Subsystem;

const NAME: &str = "bridge-port-server";

/// Bridge-port service bound to its TCP listener.
///
/// Binding happens in [`bind`](Self::bind) so that an address conflict is
/// reported at startup rather than after the supervisor is running.
pub struct BridgePortServer {
    service: BridgePortServiceImpl,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    shutdown: CancellationToken,
}

impl BridgePortServer {
    pub async fn bind(endpoint: &Endpoint, vendor: Arc<dyn VendorPlugin>) -> Result<Self> {
        let listener = TcpListener::bind((endpoint.address.as_str(), endpoint.port))
            .await
            .map_err(|e| DaemonError::startup(NAME, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::startup(NAME, e))?;
        info!(addr = %local_addr, "Bridge-port server listening");

        Ok(Self {
            service: BridgePortServiceImpl::new(vendor),
            local_addr,
            listener: Mutex::new(Some(listener)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Subsystem for BridgePortServer {
    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or_else(|| DaemonError::subsystem(NAME, "listener already consumed"))?;

        Server::builder()
            .add_service(BridgePortServiceServer::new(self.service.clone()))
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                self.shutdown.cancelled(),
            )
            .await
            .map_err(|e| DaemonError::subsystem(NAME, e))?;

        info!("Bridge-port server stopped");
        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.cancel();
    }
}
