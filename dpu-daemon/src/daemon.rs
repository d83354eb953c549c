//! The daemon: one type for both roles.
//!
//! The role decides two things: how CNI events touch the local dataplane and
//! where completed MAC pairs are applied. The DPU side applies them through
//! the vendor plugin and serves the bridge-port service; the host side sends
//! them to that service over gRPC.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::bridge_port::{BridgePortBackend, BridgePortServer, LocalBackend, RemoteBackend};
use crate::cni::{CniBridge, CniServer};
use crate::config::{DaemonConfig, Endpoint, Role};
use crate::connector::RetryingConnector;
use crate::correlator::MacPairCorrelator;
use crate::dataplane::{DataplaneConfigurator, NetworkFunctionConfigurator, SriovVfConfigurator};
use crate::device_plugin::{DevicePlugin, DevicePluginSubsystem, IdleDevicePlugin};
use crate::error::{DaemonError, Result};
use crate::plugin::{InMemoryVendorPlugin, VendorPlugin};
use crate::supervisor::{SubsystemState, Supervisor};
use crate::watch::{IdleWatchManager, WatchManager, WatchSubsystem};

/// External components the daemon drives.
pub struct Collaborators {
    pub vendor: Arc<dyn VendorPlugin>,
    pub device_plugin: Arc<dyn DevicePlugin>,
    pub watch_manager: Arc<dyn WatchManager>,
    /// Defaults to the role's configurator when unset.
    pub dataplane: Option<Arc<dyn DataplaneConfigurator>>,
}

impl Collaborators {
    /// Hardware-free collaborators: in-memory vendor plugin, idle device
    /// plugin and watch manager.
    pub fn in_memory(vendor_endpoint: Endpoint, namespace: &str) -> Self {
        Self {
            vendor: Arc::new(InMemoryVendorPlugin::new(vendor_endpoint)),
            device_plugin: Arc::new(IdleDevicePlugin::new()),
            watch_manager: Arc::new(IdleWatchManager::new(namespace)),
            dataplane: None,
        }
    }
}

/// Listeners bound by `listen`, consumed by `serve`.
struct Listeners {
    bridge_port: Option<Arc<BridgePortServer>>,
    cni: Arc<CniServer>,
}

pub struct Daemon {
    config: DaemonConfig,
    collaborators: Collaborators,
    correlator: Arc<MacPairCorrelator>,
    supervisor: Supervisor,
    listeners: Mutex<Option<Listeners>>,
    bridge_port_addr: OnceLock<SocketAddr>,
}

impl Daemon {
    pub fn new(config: DaemonConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let supervisor = Supervisor::new(config.shutdown_grace);
        Ok(Self {
            config,
            collaborators,
            correlator: Arc::new(MacPairCorrelator::new()),
            supervisor,
            listeners: Mutex::new(None),
            bridge_port_addr: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn correlator(&self) -> &Arc<MacPairCorrelator> {
        &self.correlator
    }

    /// Address the bridge-port server is bound to (DPU side, after `listen`).
    pub fn bridge_port_addr(&self) -> Option<SocketAddr> {
        self.bridge_port_addr.get().copied()
    }

    pub async fn subsystem_states(&self) -> Vec<(String, SubsystemState)> {
        self.supervisor.states().await
    }

    fn dataplane(&self) -> Arc<dyn DataplaneConfigurator> {
        match (&self.collaborators.dataplane, self.config.role) {
            (Some(dataplane), _) => Arc::clone(dataplane),
            (None, Role::DpuSide) => Arc::new(NetworkFunctionConfigurator::new()),
            (None, Role::HostSide) => Arc::new(SriovVfConfigurator::new()),
        }
    }

    /// Start the vendor stack and bind every listener.
    pub async fn listen(&self) -> Result<()> {
        let vendor = Arc::clone(&self.collaborators.vendor);
        let endpoint = vendor.start().await?;
        info!(role = %self.config.role, endpoint = %endpoint, "Vendor plugin started");

        let mut bridge_port = None;
        let backend: Arc<dyn BridgePortBackend> = match self.config.role {
            Role::DpuSide => {
                if let Err(e) = self.collaborators.device_plugin.start().await {
                    error!(error = %e, "Failed to start device plugin");
                }
                let server = BridgePortServer::bind(&endpoint, Arc::clone(&vendor)).await?;
                let _ = self.bridge_port_addr.set(server.local_addr());
                bridge_port = Some(Arc::new(server));
                Arc::new(LocalBackend::new(vendor))
            }
            Role::HostSide => {
                let target = self.config.bridge_port_endpoint.clone().unwrap_or(endpoint);
                info!(endpoint = %target, "Delegating bridge ports to DPU-side daemon");
                let connector = RetryingConnector::new(
                    target,
                    self.config.retry_policy.clone(),
                    self.config.call_timeout,
                );
                Arc::new(RemoteBackend::new(connector))
            }
        };

        let bridge = Arc::new(CniBridge::new(
            self.config.role,
            self.dataplane(),
            Arc::clone(&self.correlator),
            backend,
        ));
        let cni = Arc::new(CniServer::bind(&self.config.cni_socket_path, bridge).await?);

        *self.listeners.lock().await = Some(Listeners { bridge_port, cni });
        Ok(())
    }

    /// Run every subsystem until one ends or `stop` is called.
    pub async fn serve(&self) -> Result<()> {
        let listeners = self
            .listeners
            .lock()
            .await
            .take()
            .ok_or(DaemonError::NotListening)?;

        if let Some(server) = listeners.bridge_port {
            self.supervisor.register(server).await?;
        }
        self.supervisor.register(listeners.cni).await?;
        if self.config.role == Role::HostSide {
            let device_plugin = DevicePluginSubsystem::new(Arc::clone(&self.collaborators.device_plugin));
            self.supervisor.register(Arc::new(device_plugin)).await?;
        }
        let watch = WatchSubsystem::new(
            Arc::clone(&self.collaborators.watch_manager),
            self.supervisor.cancellation(),
        );
        self.supervisor.register(Arc::new(watch)).await?;

        info!(role = %self.config.role, namespace = %self.config.namespace, "Daemon serving");
        self.supervisor.run().await
    }

    pub async fn listen_and_serve(&self) -> Result<()> {
        self.listen().await?;
        self.serve().await
    }

    /// Stop a running daemon and wait for its teardown to finish.
    pub async fn stop(&self) {
        self.supervisor.stop().await;
    }
}
