//! Kubernetes watch-manager collaborator.
//!
//! The watch manager is the one subsystem driven by a cancellation token
//! instead of an explicit stop call. The supervisor cancels the token first
//! during shutdown.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::DaemonError;
use crate::supervisor::Subsystem;

#[async_trait]
pub trait WatchManager: Send + Sync {
    /// Watch and reconcile until `cancel` fires.
    async fn start(&self, cancel: CancellationToken) -> Result<()>;
}

/// Watch manager that reconciles nothing.
pub struct IdleWatchManager {
    namespace: String,
}

impl IdleWatchManager {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl WatchManager for IdleWatchManager {
    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        info!(namespace = %self.namespace, "Watching namespace");
        cancel.cancelled().await;
        info!(namespace = %self.namespace, "Watch cancelled");
        Ok(())
    }
}

const NAME: &str = "watch-manager";

pub struct WatchSubsystem {
    manager: Arc<dyn WatchManager>,
    cancel: CancellationToken,
}

impl WatchSubsystem {
    pub fn new(manager: Arc<dyn WatchManager>, cancel: CancellationToken) -> Self {
        Self { manager, cancel }
    }
}

#[async_trait]
impl Subsystem for WatchSubsystem {
    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self) -> crate::error::Result<()> {
        self.manager
            .start(self.cancel.clone())
            .await
            .map_err(|e| DaemonError::subsystem(NAME, format!("{e:#}")))
    }

    async fn stop(&self) {
        if !self.cancel.is_cancelled() {
            warn!("Watch manager stopped before its context was cancelled");
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watch_ends_on_cancel() {
        let cancel = CancellationToken::new();
        let subsystem = WatchSubsystem::new(
            Arc::new(IdleWatchManager::new("dpu-operator-system")),
            cancel.clone(),
        );

        let watching = tokio::spawn(async move { subsystem.run().await });
        tokio::task::yield_now().await;
        assert!(!watching.is_finished());

        cancel.cancel();
        watching.await.unwrap().unwrap();
    }
}
