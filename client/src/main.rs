use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

mod config;
mod proxy;
mod tunnel;

use config::{normalize_target, RevtunConfig};
use proxy::Forwarder;

#[derive(Parser)]
#[command(name = "revtun")]
#[command(author = "Revtun Team")]
#[command(version = "0.1.0")]
#[command(about = "Serve a local HTTP service through a revtun relay", long_about = None)]
struct Cli {
    /// Local service to expose: a port or an http(s) base URL
    target: Option<String>,

    /// Relay registration URL
    #[arg(short, long, env = "REVTUN_RELAY")]
    relay: Option<String>,

    /// Config file (defaults to revtun.yml in the working or home directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait before reconnecting
    #[arg(long)]
    reconnect_delay: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let config = resolve_config(&cli)?;
    let target = config.target.clone().unwrap_or_default();
    let forwarder = Forwarder::new(&target, config.request_timeout())?;

    info!("Exposing {} via {}", target, config.relay);
    tunnel::run(&config.relay, &target, forwarder, config.reconnect_delay()).await
}

/// Config file first, then command-line overrides
fn resolve_config(cli: &Cli) -> Result<RevtunConfig> {
    let path = cli.config.clone().or_else(RevtunConfig::find_config);
    let mut config = match path {
        Some(p) => RevtunConfig::load(&p)?,
        None => RevtunConfig::default(),
    };

    if let Some(relay) = &cli.relay {
        config.relay = relay.clone();
    }
    if let Some(target) = &cli.target {
        config.target = Some(target.clone());
    }
    if let Some(delay) = cli.reconnect_delay {
        config.reconnect_delay_secs = delay;
    }
    config.target = config.target.as_deref().map(normalize_target);

    config.validate()?;
    Ok(config)
}
