//! gRPC BridgePortService implementation.
//!
//! Served by the DPU-side daemon. Every call is handed straight to the
//! vendor plugin; vendor errors keep their message and map onto the closest
//! gRPC status code.

use std::sync::Arc;

use dpu_api::BridgePortService;
use dpu_api::proto::{BridgePort, CreateBridgePortRequest, DeleteBridgePortRequest, Empty};
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use super::spec::{BridgePortSpec, SpecError};
use crate::plugin::{VendorError, VendorPlugin};

/// Convert vendor error to gRPC status.
fn vendor_err_to_status(e: VendorError) -> Status {
    match e {
        VendorError::NotFound(msg) => Status::not_found(msg),
        VendorError::AlreadyExists(msg) => Status::already_exists(msg),
        VendorError::Unavailable(msg) => Status::unavailable(msg),
        VendorError::Other(msg) => Status::internal(msg),
    }
}

/// Convert spec error to gRPC status.
fn spec_err_to_status(e: SpecError) -> Status {
    Status::invalid_argument(e.to_string())
}

#[derive(Clone)]
pub struct BridgePortServiceImpl {
    vendor: Arc<dyn VendorPlugin>,
}

impl BridgePortServiceImpl {
    pub fn new(vendor: Arc<dyn VendorPlugin>) -> Self {
        Self { vendor }
    }
}

#[tonic::async_trait]
impl BridgePortService for BridgePortServiceImpl {
    async fn create_bridge_port(
        &self,
        request: Request<CreateBridgePortRequest>,
    ) -> Result<Response<BridgePort>, Status> {
        let req = request.into_inner();
        let port = req
            .bridge_port
            .ok_or_else(|| spec_err_to_status(SpecError::MissingBridgePort))?;
        let spec = BridgePortSpec::try_from(port).map_err(spec_err_to_status)?;

        info!(
            id = %req.bridge_port_id,
            name = %spec.name,
            mac = %spec.mac_address,
            bridges = ?spec.logical_bridges,
            "Passing CreateBridgePort"
        );

        let created = self.vendor.create_bridge_port(spec).await.map_err(|e| {
            warn!(error = %e, "CreateBridgePort rejected by vendor plugin");
            vendor_err_to_status(e)
        })?;

        Ok(Response::new(BridgePort::from(&created)))
    }

    async fn delete_bridge_port(
        &self,
        request: Request<DeleteBridgePortRequest>,
    ) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        if req.name.trim().is_empty() {
            return Err(spec_err_to_status(SpecError::MissingName));
        }

        info!(name = %req.name, allow_missing = req.allow_missing, "Passing DeleteBridgePort");

        match self.vendor.delete_bridge_port(&req.name).await {
            Ok(()) => Ok(Response::new(Empty {})),
            Err(VendorError::NotFound(_)) if req.allow_missing => Ok(Response::new(Empty {})),
            Err(e) => {
                warn!(name = %req.name, error = %e, "DeleteBridgePort rejected by vendor plugin");
                Err(vendor_err_to_status(e))
            }
        }
    }
}
