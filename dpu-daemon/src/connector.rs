//! Lazily-dialed, memoized connection to a remote bridge-port service.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use dpu_api::BridgePortServiceClient;
use thiserror::Error;
use tokio::sync::Mutex;
use tonic::Status;
use tonic::transport::{Channel, Endpoint as TonicEndpoint};
use tracing::{error, info};

use crate::config::Endpoint;
use crate::retry::{RetryError, RetryPolicy};

/// Connection errors. Cloneable so a failed dial can be memoized.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    #[error("invalid bridge-port endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Builds a client for an endpoint.
#[async_trait]
pub trait Dial: Send + Sync {
    type Client: Clone + Send + Sync + 'static;

    async fn dial(&self, endpoint: &Endpoint) -> Result<Self::Client, ConnectError>;
}

/// Dials a tonic channel without waiting for the peer to be ready.
pub struct TonicDial {
    connect_timeout: Duration,
}

impl TonicDial {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TonicDial {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Dial for TonicDial {
    type Client = BridgePortServiceClient<Channel>;

    async fn dial(&self, endpoint: &Endpoint) -> Result<Self::Client, ConnectError> {
        let channel = TonicEndpoint::from_shared(endpoint.uri())
            .map_err(|e| ConnectError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?
            .connect_timeout(self.connect_timeout)
            .connect_lazy();
        Ok(BridgePortServiceClient::new(channel))
    }
}

/// Connection to a peer's bridge-port service, dialed on first use.
///
/// Individual calls are retried according to the configured [`RetryPolicy`].
pub struct RetryingConnector<D: Dial = TonicDial> {
    endpoint: Endpoint,
    policy: RetryPolicy,
    call_timeout: Option<Duration>,
    dial: D,
    /// Memoized dial outcome; the lock serializes the first dial.
    client: Mutex<Option<Result<D::Client, ConnectError>>>,
}

impl RetryingConnector<TonicDial> {
    pub fn new(endpoint: Endpoint, policy: RetryPolicy, call_timeout: Option<Duration>) -> Self {
        Self::with_dial(endpoint, policy, call_timeout, TonicDial::default())
    }
}

impl<D: Dial> RetryingConnector<D> {
    pub fn with_dial(
        endpoint: Endpoint,
        policy: RetryPolicy,
        call_timeout: Option<Duration>,
        dial: D,
    ) -> Self {
        Self {
            endpoint,
            policy,
            call_timeout,
            dial,
            client: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Dial once and return the memoized client (or the memoized failure).
    pub async fn connect(&self) -> Result<D::Client, ConnectError> {
        let mut slot = self.client.lock().await;
        if let Some(result) = slot.as_ref() {
            return result.clone();
        }

        let result = self.dial.dial(&self.endpoint).await;
        match &result {
            Ok(_) => info!(endpoint = %self.endpoint, "Dial succeeded"),
            Err(e) => error!(endpoint = %self.endpoint, error = %e, "Dial failed"),
        }
        *slot = Some(result.clone());
        result
    }

    /// Issue one RPC through the connection, retrying per policy.
    pub async fn call<T, F, Fut>(&self, method: &str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut(D::Client) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let client = self.connect().await?;
        self.policy
            .retry(method, self.call_timeout, || op(client.clone()))
            .await
    }
}
