//! Test harness for daemon integration tests
//!
//! Runs DPU-side and host-side daemons in-process with in-memory vendor
//! plugins, on a free TCP port and unix sockets in a temp directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dpu_daemon::config::{DaemonConfig, Endpoint, Role};
use dpu_daemon::device_plugin::IdleDevicePlugin;
use dpu_daemon::plugin::InMemoryVendorPlugin;
use dpu_daemon::retry::{RetryCondition, RetryPolicy};
use dpu_daemon::watch::IdleWatchManager;
use dpu_daemon::{Collaborators, Daemon};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Short backoffs so failing tests finish quickly.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
        backoff_multiplier: 2.0,
        retryable_conditions: vec![RetryCondition::Unavailable],
    }
}

pub fn free_endpoint() -> Endpoint {
    let port = portpicker::pick_unused_port().expect("no free port");
    Endpoint::new("127.0.0.1", port)
}

pub fn collaborators(vendor: Arc<InMemoryVendorPlugin>, namespace: &str) -> Collaborators {
    Collaborators {
        vendor,
        device_plugin: Arc::new(IdleDevicePlugin::new()),
        watch_manager: Arc::new(IdleWatchManager::new(namespace)),
        dataplane: None,
    }
}

pub fn config(role: Role, socket: PathBuf) -> DaemonConfig {
    let mut config = DaemonConfig::new(role);
    config.cni_socket_path = socket;
    config.shutdown_grace = Duration::from_secs(5);
    config.retry_policy = fast_policy(5);
    config.call_timeout = Some(Duration::from_secs(2));
    config
}

/// A daemon that has bound its listeners and is serving on a task.
pub struct RunningDaemon {
    pub daemon: Arc<Daemon>,
    pub vendor: Arc<InMemoryVendorPlugin>,
    pub socket: PathBuf,
    task: JoinHandle<dpu_daemon::Result<()>>,
}

impl RunningDaemon {
    pub async fn start(config: DaemonConfig, vendor: Arc<InMemoryVendorPlugin>) -> Self {
        let socket = config.cni_socket_path.clone();
        let namespace = config.namespace.clone();
        let daemon = Arc::new(Daemon::new(config, collaborators(vendor.clone(), &namespace)).unwrap());
        daemon.listen().await.unwrap();

        let task = tokio::spawn({
            let daemon = daemon.clone();
            async move { daemon.serve().await }
        });

        Self {
            daemon,
            vendor,
            socket,
            task,
        }
    }

    /// Stop the daemon and return what `serve` returned.
    pub async fn shutdown(self) -> dpu_daemon::Result<()> {
        self.daemon.stop().await;
        self.task.await.unwrap()
    }
}

/// A DPU-side daemon and a host-side daemon pointed at it.
pub struct DaemonPair {
    pub dpu: RunningDaemon,
    pub host: RunningDaemon,
    _dir: TempDir,
}

impl DaemonPair {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = free_endpoint();

        let dpu = RunningDaemon::start(
            config(Role::DpuSide, dir.path().join("dpu/server.sock")),
            Arc::new(InMemoryVendorPlugin::new(endpoint.clone())),
        )
        .await;
        let host = RunningDaemon::start(
            config(Role::HostSide, dir.path().join("host/server.sock")),
            Arc::new(InMemoryVendorPlugin::new(endpoint)),
        )
        .await;

        Self {
            dpu,
            host,
            _dir: dir,
        }
    }

    pub async fn shutdown(self) {
        self.host.shutdown().await.unwrap();
        self.dpu.shutdown().await.unwrap();
    }
}
