//! Bridge-port control channel between the host-side and DPU-side daemons.

pub mod backend;
pub mod server;
pub mod service;
pub mod spec;

pub use backend::{BackendError, BridgePortBackend, LocalBackend, RemoteBackend};
pub use server::BridgePortServer;
pub use service::BridgePortServiceImpl;
pub use spec::{BridgePortSpec, PortType, SpecError};
