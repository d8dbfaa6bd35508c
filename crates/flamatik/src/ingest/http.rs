//! HTTP command listener
//!
//! `POST /flamatik` queues a pattern command for the scheduler.
//! `GET /health` reports liveness and the running pattern.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use flameproto::Command;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct CommandState {
    pub commands: mpsc::UnboundedSender<Command>,
    pub pattern: watch::Receiver<Option<String>>,
    pub start_time: Instant,
}

pub fn router(state: CommandState) -> Router {
    Router::new()
        .route("/flamatik", post(handle_command))
        .route("/health", get(handle_health))
        .with_state(state)
}

async fn handle_command(State(state): State<CommandState>, body: Bytes) -> (StatusCode, String) {
    let command = match Command::parse(&body) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "rejecting command");
            return (StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    info!(command = command.kind(), "queueing command");
    match state.commands.send(command) {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "scheduler is not running".to_string(),
        ),
    }
}

/// `GET /health` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub uptime_secs: u64,
    pub version: String,
    /// Running pattern, if any
    pub pattern: Option<String>,
}

async fn handle_health(State(state): State<CommandState>) -> Json<Health> {
    Json(Health {
        status: "healthy".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pattern: state.pattern.borrow().clone(),
    })
}

pub struct CommandListener {
    listener: TcpListener,
    state: CommandState,
}

impl CommandListener {
    pub async fn bind(addr: SocketAddr, state: CommandState) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "command listener bound");
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until cancelled
    pub async fn run(self, cancel: CancellationToken) -> std::io::Result<()> {
        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await?;
        info!("command listener stopped");
        Ok(())
    }
}
