//! Control HTTP server for the camera relay
//!
//! Local operator surface: the current status as JSON and a command endpoint
//! accepting the same text commands a chat user would send.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::command::CommandReply;
use crate::daemon::Daemon;
use crate::status::StatusSnapshot;

/// Errors that can occur when running the control server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Control server failed: {0}")]
    Serve(#[from] std::io::Error),
}

/// Body of `POST /command`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub text: String,
}

/// Handler for GET /status
async fn get_status(State(daemon): State<Arc<Daemon>>) -> Json<StatusSnapshot> {
    Json(daemon.status_snapshot().await)
}

/// Handler for POST /command
///
/// The command prefix is optional here; `setinterval 10` and `$setinterval 10`
/// are the same request.
async fn post_command(
    State(daemon): State<Arc<Daemon>>,
    Json(request): Json<CommandRequest>,
) -> Json<CommandReply> {
    let prefix = daemon.config.control.command_prefix.as_str();
    let text = request.text.trim();
    let text = if text.starts_with(prefix) {
        text.to_string()
    } else {
        format!("{}{}", prefix, text)
    };
    Json(daemon.handle_text(&text).await)
}

/// Creates the axum Router with the control endpoints
pub fn create_control_router(daemon: Arc<Daemon>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/command", post(post_command))
        .with_state(daemon)
}

pub async fn bind_control_listener(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Serve the control endpoints on `listener` until `shutdown` is cancelled
pub async fn serve_control(
    listener: TcpListener,
    daemon: Arc<Daemon>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Control server listening");
    }
    axum::serve(listener, create_control_router(daemon))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Runs the control server on the configured bind address
pub async fn run_control_server(
    daemon: Arc<Daemon>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = bind_control_listener(&daemon.config.control.bind).await?;
    serve_control(listener, daemon, shutdown).await
}
