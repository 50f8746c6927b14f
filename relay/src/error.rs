//! Error taxonomy for the relay.
//!
//! Transport failures surface as [`ChannelError`] at the duplex channel
//! boundary. Each gateway call turns its terminal outcome into a
//! [`GatewayError`], which maps onto exactly one HTTP status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no tunnel client connected")]
    NoActiveClient,

    #[error("connection epoch {expected} was superseded by {current:?}")]
    Superseded { expected: u64, current: Option<u64> },

    #[error("tunnel transport error: {0}")]
    Transport(String),

    #[error("tunnel connection closed")]
    ConnectionClosed,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("No tunnel client connected")]
    NoActiveClient,

    #[error("Tunnel client disconnected")]
    ClientDisconnected,

    #[error("Tunnel write error: {0}")]
    TunnelWriteError(String),

    #[error("Gateway timeout")]
    GatewayTimeout,

    #[error("Duplicate correlation id: {0}")]
    DuplicateId(String),

    #[error("Request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Invalid reply from tunnel client: {0}")]
    InvalidReply(String),

    #[error("Encode error: {0}")]
    Encode(#[from] revtun_shared::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoActiveClient | GatewayError::ClientDisconnected => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::TunnelWriteError(_) | GatewayError::InvalidReply(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::BodyRead(_) => StatusCode::BAD_REQUEST,
            GatewayError::DuplicateId(_) | GatewayError::Encode(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ChannelError> for GatewayError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::NoActiveClient => GatewayError::NoActiveClient,
            ChannelError::Superseded { .. } | ChannelError::ConnectionClosed => {
                GatewayError::ClientDisconnected
            }
            ChannelError::Transport(e) => GatewayError::TunnelWriteError(e),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "internal gateway failure");
        }
        (status, self.to_string()).into_response()
    }
}
