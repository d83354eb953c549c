//! dpu-daemon: CNI-to-DPU control-plane daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dpu_daemon::config::{CNI_SOCKET_PATH, DaemonConfig, Endpoint, Role};
use dpu_daemon::retry::RetryPolicy;
use dpu_daemon::{Collaborators, Daemon};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VendorKind {
    /// In-memory plugin, no hardware
    Mock,
}

/// DPU control-plane daemon
#[derive(Parser, Debug)]
#[command(name = "dpu-daemon", version, about)]
struct Args {
    /// Which side of the host/DPU pair this instance runs on
    #[arg(long, value_enum)]
    role: Role,

    /// CNI server socket path
    #[arg(long, default_value = CNI_SOCKET_PATH)]
    cni_socket: PathBuf,

    /// Bridge-port service of the DPU-side daemon (host role; overrides the
    /// endpoint reported by the vendor plugin)
    #[arg(long)]
    bridge_port_endpoint: Option<Endpoint>,

    /// Namespace watched by the manager (defaults per role)
    #[arg(long)]
    namespace: Option<String>,

    /// Grace period for subsystem shutdown in seconds
    #[arg(long, default_value = "60")]
    shutdown_grace_secs: u64,

    /// JSON retry policy for bridge-port calls
    #[arg(long)]
    retry_policy: Option<PathBuf>,

    /// Per-attempt deadline for bridge-port calls in seconds (0 disables)
    #[arg(long, default_value = "30")]
    call_timeout_secs: u64,

    /// Vendor plugin implementation
    #[arg(long, value_enum, default_value = "mock")]
    vendor: VendorKind,

    /// Bridge-port endpoint reported by the mock vendor plugin
    #[arg(long, default_value = "127.0.0.1:50151")]
    vendor_endpoint: Endpoint,
}

impl Args {
    fn config(&self) -> Result<DaemonConfig> {
        let mut config = DaemonConfig::new(self.role);
        config.cni_socket_path = self.cni_socket.clone();
        config.bridge_port_endpoint = self.bridge_port_endpoint.clone();
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        config.shutdown_grace = Duration::from_secs(self.shutdown_grace_secs);
        config.call_timeout = match self.call_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        if let Some(path) = &self.retry_policy {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read retry policy {}", path.display()))?;
            config.retry_policy = RetryPolicy::from_json(&json)
                .with_context(|| format!("Invalid retry policy {}", path.display()))?;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dpu_daemon=info,tonic=warn,tower=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.config()?;
    info!(role = %config.role, socket = %config.cni_socket_path.display(), "Starting dpu-daemon");

    let collaborators = match args.vendor {
        VendorKind::Mock => Collaborators::in_memory(args.vendor_endpoint.clone(), &config.namespace),
    };
    let daemon = Arc::new(Daemon::new(config, collaborators)?);

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to set up SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler")?;
    tokio::spawn({
        let daemon = Arc::clone(&daemon);
        async move {
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
            }
            daemon.stop().await;
        }
    });

    if let Err(e) = daemon.listen_and_serve().await {
        error!(error = %e, "Daemon failed");
        return Err(e.into());
    }

    info!("Daemon stopped");
    Ok(())
}
