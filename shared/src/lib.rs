//! Revtun Shared Library
//!
//! Wire protocol and error types used by both the relay and the tunnel client.

pub mod protocol;
pub mod error;

pub use error::{Error, Result};
