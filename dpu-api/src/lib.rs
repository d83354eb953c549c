//! Generated protobuf types for the bridge-port control channel.
//!
//! The DPU-side daemon serves `BridgePortService`; the host-side daemon is a
//! client of it.

pub mod proto {
    tonic::include_proto!("dpu.bridgeport.v1");
}

pub use proto::bridge_port_service_client::BridgePortServiceClient;
pub use proto::bridge_port_service_server::{BridgePortService, BridgePortServiceServer};

// Re-export tonic for consumers that need matching versions
pub use tonic;
