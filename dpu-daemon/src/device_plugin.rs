//! Kubelet device-plugin collaborator.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::DaemonError;
use crate::supervisor::Subsystem;

/// Advertises DPU resources to the kubelet.
#[async_trait]
pub trait DevicePlugin: Send + Sync {
    /// Prepare resources (register with the kubelet, discover devices).
    async fn start(&self) -> Result<()>;

    /// Serve until stopped.
    async fn listen_and_serve(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Device plugin that advertises nothing and serves until stopped.
#[derive(Default)]
pub struct IdleDevicePlugin {
    shutdown: CancellationToken,
}

impl IdleDevicePlugin {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DevicePlugin for IdleDevicePlugin {
    async fn start(&self) -> Result<()> {
        info!("Device plugin started");
        Ok(())
    }

    async fn listen_and_serve(&self) -> Result<()> {
        self.shutdown.cancelled().await;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}

const NAME: &str = "device-plugin";

/// Runs a [`DevicePlugin`] under the supervisor.
pub struct DevicePluginSubsystem {
    plugin: Arc<dyn DevicePlugin>,
}

impl DevicePluginSubsystem {
    pub fn new(plugin: Arc<dyn DevicePlugin>) -> Self {
        Self { plugin }
    }
}

#[async_trait]
impl Subsystem for DevicePluginSubsystem {
    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self) -> crate::error::Result<()> {
        self.plugin
            .listen_and_serve()
            .await
            .map_err(|e| DaemonError::subsystem(NAME, format!("{e:#}")))
    }

    async fn stop(&self) {
        if let Err(e) = self.plugin.stop().await {
            warn!(error = %e, "Device plugin stop failed");
        }
    }
}
