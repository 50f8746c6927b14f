//! Tunnel session: registration, request dispatch, reconnects

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

use revtun_shared::protocol::{Registered, TunnelRequest, TunnelResponse, PROTOCOL_VERSION};

use crate::proxy::Forwarder;

/// Keep a tunnel up until Ctrl+C, reconnecting after `reconnect_delay`.
pub async fn run(relay_url: &str, target: &str, forwarder: Forwarder, reconnect_delay: Duration) -> Result<()> {
    loop {
        tokio::select! {
            res = run_session(relay_url, target, &forwarder) => {
                match res {
                    Ok(()) => info!("Relay closed the tunnel"),
                    Err(e) => error!("Tunnel error: {:#}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                return Ok(());
            }
        }

        info!("Reconnecting in {}s...", reconnect_delay.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

/// One connection to the relay. Returns when the connection ends.
async fn run_session(relay_url: &str, target: &str, forwarder: &Forwarder) -> Result<()> {
    info!("Connecting to relay: {}", relay_url);

    let (ws_stream, _) = connect_async(relay_url)
        .await
        .context("Failed to connect to relay server")?;

    let (mut write, mut read) = ws_stream.split();

    let registered: Registered = match read.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str(&text)?,
        other => anyhow::bail!("Unexpected registration reply: {:?}", other),
    };
    if !registered.success {
        return Err(revtun_shared::Error::Registration("relay refused the tunnel".into()).into());
    }
    if registered.version != PROTOCOL_VERSION {
        warn!(relay = registered.version, ours = PROTOCOL_VERSION, "protocol version mismatch");
    }

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║  Revtun Active                                               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Relay:      {:<47} ║", relay_url);
    println!("║  Local:      {:<47} ║", target);
    println!("║  Session:    {:<47} ║", registered.epoch);
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    // Replies from request tasks; this loop is the only socket writer
    let (tx, mut rx) = mpsc::channel::<TunnelResponse>(100);

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => dispatch(&data, forwarder, &tx),
                    Some(Ok(Message::Text(text))) => dispatch(text.as_bytes(), forwarder, &tx),
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Connection closed");
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(e).context("WebSocket error");
                    }
                    _ => {}
                }
            }
            Some(resp) = rx.recv() => {
                let data = resp.encode()?;
                write.send(Message::Binary(data)).await
                    .context("Failed to send response")?;
            }
        }
    }
}

/// Decode a request frame and handle it on its own task
fn dispatch(data: &[u8], forwarder: &Forwarder, tx: &mpsc::Sender<TunnelResponse>) {
    let request = match TunnelRequest::decode(data) {
        Ok(r) => r,
        Err(e) => {
            warn!("Dropping malformed request frame: {}", e);
            return;
        }
    };

    info!("{} {} [{}]", request.method, request.path, request.id);

    let forwarder = forwarder.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let resp = forwarder.forward(request).await;
        let _ = tx.send(resp).await;
    });
}
