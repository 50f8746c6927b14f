use anyhow::Result;
use axum::{
    extract::State,
    routing::{any, get},
    Json, Router,
};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod channel;
mod config;
mod correlation;
mod error;
mod gateway;
mod headers;
mod id;
mod registration;


use channel::DuplexChannel;
use config::RelayConfig;
use correlation::CorrelationTable;
use id::IdGenerator;

/// Path the tunnel client connects to
pub const TUNNEL_PATH: &str = "/tunnel";

/// Relay status, kept under a reserved prefix so it never shadows
/// application paths served through the tunnel
pub const STATUS_PATH: &str = "/_relay/status";

#[derive(Clone)]
pub struct AppState {
    channel: Arc<DuplexChannel>,
    pending: Arc<CorrelationTable>,
    ids: Arc<IdGenerator>,
    config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            channel: Arc::new(DuplexChannel::new()),
            pending: Arc::new(CorrelationTable::new()),
            ids: Arc::new(IdGenerator::new()),
            config: Arc::new(config),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route(TUNNEL_PATH, get(registration::ws_handler))
        .route(STATUS_PATH, get(status_handler))
        .fallback(any(gateway::proxy_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::parse();
    config.validate()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("revtun_relay={}", config.log_level)));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let addr = config.listen_addr();
    info!(
        %addr,
        timeout_secs = config.gateway_timeout_secs,
        "Revtun relay listening (tunnel endpoint {})",
        TUNNEL_PATH
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(AppState::new(config))).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct RelayStatus {
    connected: bool,
    epoch: Option<u64>,
    connected_at: Option<chrono::DateTime<chrono::Utc>>,
    pending: usize,
}

async fn status_handler(State(state): State<AppState>) -> Json<RelayStatus> {
    let active = state.channel.status().await;
    Json(RelayStatus {
        connected: active.is_some(),
        epoch: active.map(|s| s.epoch),
        connected_at: active.map(|s| s.connected_at),
        pending: state.pending.len(),
    })
}
