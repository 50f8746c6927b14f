//! Relay configuration: CLI flags with environment fallbacks.

use anyhow::Result;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Public HTTP endpoint served by a reverse-tunnelled client
#[derive(Parser, Debug, Clone)]
#[command(name = "revtun-relay", version, about = "Revtun relay server")]
pub struct RelayConfig {
    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 10000)]
    pub port: u16,

    /// Listen address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Seconds a public request waits for the tunnel client's reply
    #[arg(long, env = "GATEWAY_TIMEOUT_SECS", default_value_t = 30)]
    pub gateway_timeout_secs: u64,

    /// Largest public request body forwarded, in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_body_bytes: usize,

    /// Seconds between heartbeat pings on the tunnel connection
    #[arg(long, env = "HEARTBEAT_SECS", default_value_t = 20)]
    pub heartbeat_secs: u64,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.gateway_timeout_secs == 0 {
            anyhow::bail!("gateway timeout must be at least one second");
        }
        if self.heartbeat_secs == 0 {
            anyhow::bail!("heartbeat interval must be at least one second");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::parse_from(["revtun-relay"]);
        assert_eq!(config.gateway_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_override() {
        let config = RelayConfig::parse_from([
            "revtun-relay",
            "--port",
            "8081",
            "--bind",
            "127.0.0.1",
            "--gateway-timeout-secs",
            "5",
        ]);
        assert_eq!(config.listen_addr(), "127.0.0.1:8081".parse().unwrap());
        assert_eq!(config.gateway_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = RelayConfig::parse_from(["revtun-relay", "--gateway-timeout-secs", "0"]);
        assert!(config.validate().is_err());
    }
}
