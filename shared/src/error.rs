//! Error types for Revtun.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Registration failed: {0}")]
    Registration(String),
}
