//! CNI server: HTTP over a unix socket, one `POST /cni` per CNI invocation.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::UnixListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::bridge::{CniBridge, CniError};
use super::types::PodNetworkRequest;
use crate::error::{DaemonError, Result};
use crate::supervisor::Subsystem;

const NAME: &str = "cni-server";

/// HTTP path the CNI shim posts to.
pub const CNI_PATH: &str = "/cni";

/// Error body returned for failed requests.
#[derive(Debug, Serialize, Deserialize)]
pub struct CniErrorBody {
    pub error: String,
}

struct CniErrorResponse {
    status: StatusCode,
    error: String,
}

impl IntoResponse for CniErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(CniErrorBody { error: self.error })).into_response()
    }
}

impl From<CniError> for CniErrorResponse {
    fn from(e: CniError) -> Self {
        let status = match e {
            CniError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CniError::DataplaneConfig(_) | CniError::VendorDelegation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            error: e.to_string(),
        }
    }
}

async fn handle_cni(
    State(bridge): State<Arc<CniBridge>>,
    payload: std::result::Result<Json<PodNetworkRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Malformed CNI request");
            return CniErrorResponse {
                status: StatusCode::BAD_REQUEST,
                error: rejection.body_text(),
            }
            .into_response();
        }
    };

    match bridge.handle(&request).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            warn!(command = ?request.command, netns = %request.netns, error = %e, "CNI request failed");
            CniErrorResponse::from(e).into_response()
        }
    }
}

pub fn router(bridge: Arc<CniBridge>) -> Router {
    Router::new()
        .route(CNI_PATH, post(handle_cni))
        .with_state(bridge)
}

/// CNI server bound to its unix socket.
pub struct CniServer {
    socket_path: PathBuf,
    bridge: Arc<CniBridge>,
    listener: Mutex<Option<UnixListener>>,
    shutdown: CancellationToken,
}

impl CniServer {
    /// Bind the socket, replacing a stale one left by a previous run.
    pub async fn bind(socket_path: impl AsRef<Path>, bridge: Arc<CniBridge>) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        if let Some(parent) = socket_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DaemonError::startup(NAME, e))?;
        }
        match tokio::fs::remove_file(&socket_path).await {
            Ok(()) => info!(path = %socket_path.display(), "Removed stale CNI socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(DaemonError::startup(NAME, e)),
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| DaemonError::startup(NAME, e))?;
        info!(path = %socket_path.display(), "CNI server listening");

        Ok(Self {
            socket_path,
            bridge,
            listener: Mutex::new(Some(listener)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

#[async_trait]
impl Subsystem for CniServer {
    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or_else(|| DaemonError::subsystem(NAME, "listener already consumed"))?;

        let shutdown = self.shutdown.clone();
        let served = axum::serve(listener, router(Arc::clone(&self.bridge)))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        if let Err(e) = tokio::fs::remove_file(&self.socket_path).await {
            warn!(path = %self.socket_path.display(), error = %e, "Failed to remove CNI socket");
        }
        served.map_err(|e| DaemonError::subsystem(NAME, e))?;

        info!("CNI server stopped");
        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.cancel();
    }
}
