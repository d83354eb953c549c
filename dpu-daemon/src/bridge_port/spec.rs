//! Bridge-port specification and its protobuf form.

use dpu_api::proto;
use thiserror::Error;

use crate::mac::{InvalidMac, MacAddress};

/// Physical function that host-side VFs hang off.
pub const HOST_PF: u32 = 0;

/// Logical bridge ids are offset from the VF index by this amount.
pub const LOGICAL_BRIDGE_OFFSET: u32 = 2;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("bridge port is required")]
    MissingBridgePort,

    #[error("bridge port name is required")]
    MissingName,

    #[error("bridge port {0} has no spec")]
    MissingSpec(String),

    #[error(transparent)]
    InvalidMac(#[from] InvalidMac),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    Unspecified,
    Access,
    Trunk,
}

impl From<PortType> for proto::BridgePortType {
    fn from(value: PortType) -> Self {
        match value {
            PortType::Unspecified => proto::BridgePortType::Unspecified,
            PortType::Access => proto::BridgePortType::Access,
            PortType::Trunk => proto::BridgePortType::Trunk,
        }
    }
}

impl From<i32> for PortType {
    fn from(value: i32) -> Self {
        match proto::BridgePortType::try_from(value) {
            Ok(proto::BridgePortType::Access) => PortType::Access,
            Ok(proto::BridgePortType::Trunk) => PortType::Trunk,
            _ => PortType::Unspecified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgePortSpec {
    pub name: String,
    pub port_type: PortType,
    pub mac_address: MacAddress,
    pub logical_bridges: Vec<String>,
}

impl BridgePortSpec {
    /// Deterministic name for a (pf, vf) pair; the only deletion key.
    pub fn port_name(pf: u32, vf: u32) -> String {
        format!("host{pf}-{vf}")
    }

    /// Access port for a host VF, bound to the VF's logical bridge.
    pub fn for_vf(pf: u32, vf: u32, mac_address: MacAddress) -> Self {
        Self {
            name: Self::port_name(pf, vf),
            port_type: PortType::Access,
            mac_address,
            logical_bridges: vec![(vf + LOGICAL_BRIDGE_OFFSET).to_string()],
        }
    }
}

impl From<&BridgePortSpec> for proto::BridgePort {
    fn from(spec: &BridgePortSpec) -> Self {
        proto::BridgePort {
            name: spec.name.clone(),
            spec: Some(proto::BridgePortSpec {
                ptype: proto::BridgePortType::from(spec.port_type) as i32,
                mac_address: spec.mac_address.octets().to_vec(),
                logical_bridges: spec.logical_bridges.clone(),
            }),
        }
    }
}

impl TryFrom<proto::BridgePort> for BridgePortSpec {
    type Error = SpecError;

    fn try_from(port: proto::BridgePort) -> Result<Self, Self::Error> {
        if port.name.trim().is_empty() {
            return Err(SpecError::MissingName);
        }
        let spec = port.spec.ok_or_else(|| SpecError::MissingSpec(port.name.clone()))?;
        Ok(Self {
            name: port.name,
            port_type: PortType::from(spec.ptype),
            mac_address: MacAddress::from_slice(&spec.mac_address)?,
            logical_bridges: spec.logical_bridges,
        })
    }
}
