//! dpu-daemon: bridges CNI network-attachment events to the DPU dataplane.
//!
//! The same daemon runs on both sides of a host/DPU pair:
//! - DPU side: serves the bridge-port gRPC service and programs the vendor
//!   plugin directly
//! - Host side: hands VFs to pods and delegates bridge-port changes to the
//!   DPU side over gRPC
//!
//! Both pair the two MACs a network function announces per network
//! namespace and act once per completed pair.

pub mod bridge_port;
pub mod cni;
pub mod config;
pub mod connector;
pub mod correlator;
pub mod daemon;
pub mod dataplane;
pub mod device_plugin;
pub mod error;
pub mod mac;
pub mod plugin;
pub mod retry;
pub mod supervisor;
pub mod watch;

pub use daemon::{Collaborators, Daemon};
pub use error::{DaemonError, Result};

// Re-export tonic for external tests that need matching versions
pub use tonic;
