//! Turns CNI ADD/DEL events into dataplane changes.
//!
//! Every event first goes to the role's [`DataplaneConfigurator`]. The MACs
//! announced by ADDs are then paired per network namespace; the bridge-port
//! backend is only involved when a pair completes (ADD) or a complete pair is
//! broken up (DEL).

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use super::types::{CniCommand, CniResult, PodNetworkRequest};
use crate::bridge_port::{BackendError, BridgePortBackend};
use crate::config::Role;
use crate::correlator::MacPairCorrelator;
use crate::dataplane::{DataplaneConfigurator, DataplaneError};

#[derive(Debug, Error)]
pub enum CniError {
    #[error("dataplane configuration failed: {0}")]
    DataplaneConfig(#[source] DataplaneError),

    #[error("bridge-port delegation failed: {0}")]
    VendorDelegation(#[source] BackendError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub struct CniBridge {
    role: Role,
    dataplane: Arc<dyn DataplaneConfigurator>,
    correlator: Arc<MacPairCorrelator>,
    backend: Arc<dyn BridgePortBackend>,
}

impl CniBridge {
    pub fn new(
        role: Role,
        dataplane: Arc<dyn DataplaneConfigurator>,
        correlator: Arc<MacPairCorrelator>,
        backend: Arc<dyn BridgePortBackend>,
    ) -> Self {
        Self {
            role,
            dataplane,
            correlator,
            backend,
        }
    }

    pub fn correlator(&self) -> &Arc<MacPairCorrelator> {
        &self.correlator
    }

    pub async fn add(&self, request: &PodNetworkRequest) -> Result<CniResult, CniError> {
        request.validate().map_err(CniError::InvalidRequest)?;
        info!(
            role = %self.role,
            netns = %request.netns,
            mac = %request.config.mac,
            vf = request.config.vf_index,
            "CNI ADD"
        );

        let result = self
            .dataplane
            .cmd_add(request)
            .await
            .map_err(CniError::DataplaneConfig)?;

        // Pair on the normalized MAC so case or separator differences between
        // the two ADDs do not matter.
        let mac = request
            .mac()
            .map(|m| m.to_string())
            .unwrap_or_else(|| request.config.mac.clone());

        if let Some(pair) = self.correlator.add(&request.netns, &mac).await {
            info!(
                netns = %request.netns,
                first = %pair.first,
                second = %pair.second,
                backend = self.backend.kind(),
                "MAC pair complete, creating bridge port"
            );
            if let Err(e) = self.backend.create(&pair, request).await {
                warn!(
                    netns = %request.netns,
                    error = %e,
                    "Bridge-port creation failed; dataplane configuration is left in place"
                );
                return Err(CniError::VendorDelegation(e));
            }
        }

        Ok(result)
    }

    pub async fn del(&self, request: &PodNetworkRequest) -> Result<Option<CniResult>, CniError> {
        request.validate().map_err(CniError::InvalidRequest)?;
        info!(role = %self.role, netns = %request.netns, vf = request.config.vf_index, "CNI DEL");

        let teardown = self.dataplane.cmd_del(request).await;
        if let Err(e) = &teardown {
            error!(netns = %request.netns, error = %e, "Dataplane teardown failed");
        }

        let mut delegation = Ok(());
        if let Some(pair) = self.correlator.del(&request.netns).await {
            info!(
                netns = %request.netns,
                first = %pair.first,
                second = %pair.second,
                backend = self.backend.kind(),
                "MAC pair broken up, deleting bridge port"
            );
            delegation = self.backend.delete(&pair, request).await;
            if let Err(e) = &delegation {
                error!(netns = %request.netns, error = %e, "Bridge-port deletion failed");
            }
        }

        teardown.map_err(CniError::DataplaneConfig)?;
        delegation.map_err(CniError::VendorDelegation)?;
        Ok(None)
    }

    /// Dispatch on the request's command.
    pub async fn handle(&self, request: &PodNetworkRequest) -> Result<Option<CniResult>, CniError> {
        match request.command {
            CniCommand::Add => self.add(request).await.map(Some),
            CniCommand::Del => self.del(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::MacPair;
    use crate::dataplane::SriovVfConfigurator;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingBackend {
        created: Mutex<Vec<MacPair>>,
        deleted: Mutex<Vec<MacPair>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl BridgePortBackend for RecordingBackend {
        fn kind(&self) -> &'static str {
            "recording"
        }

        async fn create(&self, pair: &MacPair, _: &PodNetworkRequest) -> Result<(), BackendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Vendor(crate::plugin::VendorError::Unavailable(
                    "down".to_string(),
                )));
            }
            self.created.lock().unwrap().push(pair.clone());
            Ok(())
        }

        async fn delete(&self, pair: &MacPair, _: &PodNetworkRequest) -> Result<(), BackendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Vendor(crate::plugin::VendorError::NotFound(
                    "host0-0".to_string(),
                )));
            }
            self.deleted.lock().unwrap().push(pair.clone());
            Ok(())
        }
    }

    /// Dataplane whose add or del can be made to fail.
    #[derive(Default)]
    struct FlakyDataplane {
        fail_add: AtomicBool,
        fail_del: AtomicBool,
    }

    #[async_trait]
    impl DataplaneConfigurator for FlakyDataplane {
        fn kind(&self) -> &'static str {
            "flaky"
        }

        async fn cmd_add(&self, request: &PodNetworkRequest) -> Result<CniResult, DataplaneError> {
            if self.fail_add.load(Ordering::SeqCst) {
                return Err(DataplaneError::Other("no VF".to_string()));
            }
            Ok(CniResult::for_request(request))
        }

        async fn cmd_del(&self, _: &PodNetworkRequest) -> Result<(), DataplaneError> {
            if self.fail_del.load(Ordering::SeqCst) {
                return Err(DataplaneError::Other("busy".to_string()));
            }
            Ok(())
        }
    }

    const A: &str = "aa:bb:cc:dd:ee:01";
    const B: &str = "aa:bb:cc:dd:ee:02";

    fn bridge(
        dataplane: Arc<dyn DataplaneConfigurator>,
    ) -> (CniBridge, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        let bridge = CniBridge::new(
            Role::HostSide,
            dataplane,
            Arc::new(MacPairCorrelator::new()),
            backend.clone(),
        );
        (bridge, backend)
    }

    #[tokio::test]
    async fn test_create_fires_once_per_pair() {
        let (bridge, backend) = bridge(Arc::new(SriovVfConfigurator::new()));

        bridge.add(&PodNetworkRequest::add("ns1", A, 0)).await.unwrap();
        assert!(backend.created.lock().unwrap().is_empty());

        bridge.add(&PodNetworkRequest::add("ns1", B, 0)).await.unwrap();
        assert_eq!(
            *backend.created.lock().unwrap(),
            vec![MacPair {
                first: A.to_string(),
                second: B.to_string()
            }]
        );

        bridge
            .add(&PodNetworkRequest::add("ns1", "aa:bb:cc:dd:ee:03", 0))
            .await
            .unwrap();
        assert_eq!(backend.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mac_is_normalized_before_pairing() {
        let (bridge, backend) = bridge(Arc::new(SriovVfConfigurator::new()));
        bridge
            .add(&PodNetworkRequest::add("ns1", "AA-BB-CC-DD-EE-01", 0))
            .await
            .unwrap();
        bridge.add(&PodNetworkRequest::add("ns1", B, 0)).await.unwrap();
        assert_eq!(backend.created.lock().unwrap()[0].first, A);
    }

    #[tokio::test]
    async fn test_delete_fires_once() {
        let (bridge, backend) = bridge(Arc::new(SriovVfConfigurator::new()));
        bridge.add(&PodNetworkRequest::add("ns1", A, 0)).await.unwrap();
        bridge.add(&PodNetworkRequest::add("ns1", B, 0)).await.unwrap();

        assert_eq!(bridge.del(&PodNetworkRequest::del("ns1", 0)).await.unwrap(), None);
        bridge.del(&PodNetworkRequest::del("ns1", 0)).await.unwrap();
        bridge.del(&PodNetworkRequest::del("ns1", 0)).await.unwrap();
        assert_eq!(backend.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dataplane_failure_leaves_correlator_untouched() {
        let dataplane = Arc::new(FlakyDataplane::default());
        dataplane.fail_add.store(true, Ordering::SeqCst);
        let (bridge, backend) = bridge(dataplane);

        let err = bridge.add(&PodNetworkRequest::add("ns1", A, 0)).await.unwrap_err();
        assert!(matches!(err, CniError::DataplaneConfig(_)));
        assert_eq!(bridge.correlator().len("ns1").await, 0);
        assert!(backend.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_del_cleans_up_after_teardown_failure() {
        let dataplane = Arc::new(FlakyDataplane::default());
        let (bridge, backend) = bridge(dataplane.clone());
        bridge.add(&PodNetworkRequest::add("ns1", A, 0)).await.unwrap();
        bridge.add(&PodNetworkRequest::add("ns1", B, 0)).await.unwrap();

        dataplane.fail_del.store(true, Ordering::SeqCst);
        let err = bridge.del(&PodNetworkRequest::del("ns1", 0)).await.unwrap_err();
        assert!(matches!(err, CniError::DataplaneConfig(_)));
        assert_eq!(backend.deleted.lock().unwrap().len(), 1);
        assert_eq!(bridge.correlator().len("ns1").await, 1);
    }

    #[tokio::test]
    async fn test_backend_failure_is_vendor_delegation_error() {
        let (bridge, backend) = bridge(Arc::new(SriovVfConfigurator::new()));
        backend.fail.store(true, Ordering::SeqCst);

        bridge.add(&PodNetworkRequest::add("ns1", A, 0)).await.unwrap();
        let err = bridge.add(&PodNetworkRequest::add("ns1", B, 0)).await.unwrap_err();
        assert!(matches!(err, CniError::VendorDelegation(_)));
        // The pair is still recorded; no rollback.
        assert_eq!(bridge.correlator().len("ns1").await, 2);

        let err = bridge.del(&PodNetworkRequest::del("ns1", 0)).await.unwrap_err();
        assert!(matches!(err, CniError::VendorDelegation(_)));
        assert_eq!(bridge.correlator().len("ns1").await, 1);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_dataplane() {
        let (bridge, _) = bridge(Arc::new(SriovVfConfigurator::new()));
        let err = bridge
            .add(&PodNetworkRequest::add("ns1", "not-a-mac", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CniError::InvalidRequest(_)));
    }
}
