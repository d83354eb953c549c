//! Client side of the CNI socket, as used by the CNI shim binary.

use std::path::{Path, PathBuf};

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode, header};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use hyperlocal::UnixConnector;
use thiserror::Error;

use super::server::{CNI_PATH, CniErrorBody};
use super::types::{CniResult, PodNetworkRequest};

#[derive(Debug, Error)]
pub enum CniClientError {
    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("CNI socket unreachable: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read response: {0}")]
    Body(#[from] hyper::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon rejected request ({status}): {error}")]
    Rejected { status: StatusCode, error: String },
}

pub struct CniClient {
    socket_path: PathBuf,
    client: Client<UnixConnector, Full<Bytes>>,
}

impl CniClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            client: Client::builder(TokioExecutor::new()).build(UnixConnector),
        }
    }

    /// Send one request. DEL yields `None`.
    pub async fn send(&self, request: &PodNetworkRequest) -> Result<Option<CniResult>, CniClientError> {
        let body = serde_json::to_vec(request)?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(hyperlocal::Uri::new(&self.socket_path, CNI_PATH))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))?;

        let resp = self.client.request(req).await?;
        let status = resp.status();
        let bytes = resp.into_body().collect().await?.to_bytes();

        if !status.is_success() {
            let error = serde_json::from_slice::<CniErrorBody>(&bytes)
                .map(|b| b.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            return Err(CniClientError::Rejected { status, error });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}
