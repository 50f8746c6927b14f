//! Configuration file parser for Revtun
//!
//! Supports revtun.yml with the relay URL, the local service to expose,
//! and reconnect / request timing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevtunConfig {
    /// Relay registration endpoint
    #[serde(default = "default_relay")]
    pub relay: String,

    /// Local service base URL, e.g. http://127.0.0.1:3000
    pub target: Option<String>,

    /// Delay before reconnecting after the tunnel drops
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Per-request timeout against the local service
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for RevtunConfig {
    fn default() -> Self {
        Self {
            relay: default_relay(),
            target: None,
            reconnect_delay_secs: default_reconnect_delay(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_relay() -> String {
    "ws://localhost:10000/tunnel".to_string()
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

impl RevtunConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: RevtunConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate the merged configuration
    pub fn validate(&self) -> Result<()> {
        if !self.relay.starts_with("ws://") && !self.relay.starts_with("wss://") {
            anyhow::bail!("Relay URL must start with ws:// or wss://: {}", self.relay);
        }
        match self.target.as_deref() {
            None => anyhow::bail!("No local target given (argument or `target:` in config)"),
            Some(t) if !t.starts_with("http://") && !t.starts_with("https://") => {
                anyhow::bail!("Target must be an http(s) URL or a port: {}", t)
            }
            Some(_) => {}
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be at least one second");
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Search for config file in standard locations
    pub fn find_config() -> Option<PathBuf> {
        let candidates = ["revtun.yml", "revtun.yaml", ".revtun.yml", ".revtun.yaml"];

        // Check current directory
        for name in &candidates {
            let path = PathBuf::from(name);
            if path.exists() {
                return Some(path);
            }
        }

        // Check home directory
        if let Some(home) = dirs::home_dir() {
            for name in &candidates {
                let path = home.join(name);
                if path.exists() {
                    return Some(path);
                }
            }
        }

        None
    }
}

/// Accept a bare port as shorthand for a local HTTP service
pub fn normalize_target(target: &str) -> String {
    match target.parse::<u16>() {
        Ok(port) => format!("http://127.0.0.1:{}", port),
        Err(_) => target.trim_end_matches('/').to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
relay: wss://relay.example.com/tunnel
target: http://127.0.0.1:3000
reconnect_delay_secs: 2
"#;
        let config: RevtunConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.relay, "wss://relay.example.com/tunnel");
        assert_eq!(config.target.as_deref(), Some("http://127.0.0.1:3000"));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_target_rejected() {
        let config = RevtunConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_relay_scheme_rejected() {
        let config = RevtunConfig {
            relay: "http://relay/tunnel".into(),
            target: Some("http://127.0.0.1:80".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_normalize_target() {
        assert_eq!(normalize_target("3000"), "http://127.0.0.1:3000");
        assert_eq!(normalize_target("http://app.local:8080/"), "http://app.local:8080");
    }
}
