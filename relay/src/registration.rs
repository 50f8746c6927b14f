//! Tunnel client registration and the per-connection session loop
//!
//! A WebSocket upgrade on the registration endpoint installs the socket as
//! the active duplex channel. The session loop is then the only task that
//! touches the socket: it drains the outbound queue, routes inbound replies
//! to the correlation table, and sends heartbeats.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, Stream, StreamExt},
};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use revtun_shared::protocol::{Registered, TunnelResponse, MAX_MESSAGE_SIZE};

use crate::channel::Installed;
use crate::error::ChannelError;
use crate::AppState;

/// Heartbeat intervals without any inbound frame before the client is dropped
const MISSED_HEARTBEATS: u32 = 3;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let Installed {
        epoch,
        previous,
        mut outbound,
    } = state.channel.set().await;

    if let Some(old) = previous {
        let failed = state.pending.fail_epoch(old);
        if failed > 0 {
            warn!(epoch = old, failed, "failed requests of replaced tunnel connection");
        }
    }

    let (mut sender, receiver) = socket.split();
    let mut reader = TunnelReader::new(receiver);
    let write_limit = state.config.heartbeat();

    let hello = serde_json::to_string(&Registered::new(epoch)).unwrap_or_default();
    match write_frame(&mut sender, Message::Text(hello), write_limit).await {
        Ok(()) => {
            info!(epoch, "tunnel client connected");
            run_session(&state, epoch, &mut sender, &mut reader, &mut outbound).await;
        }
        Err(e) => warn!(epoch, error = %e, "tunnel client went away during registration"),
    }

    let failed = end_session(&state, epoch, outbound).await;
    info!(epoch, failed, "tunnel session ended");

    let _ = write_frame(&mut sender, Message::Close(None), write_limit).await;
}

/// Tear down one session and fail every request still waiting on it.
///
/// The channel is cleared before the queue is closed, so a gateway racing
/// with teardown sees the client as gone rather than as a write failure.
async fn end_session(state: &AppState, epoch: u64, outbound: mpsc::Receiver<Vec<u8>>) -> usize {
    state.channel.clear(epoch).await;
    drop(outbound);
    state.pending.fail_epoch(epoch)
}

/// Write one frame, giving up once the client stops draining the socket
async fn write_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: Message,
    limit: Duration,
) -> Result<(), ChannelError> {
    match timeout(limit, sender.send(msg)).await {
        Ok(res) => res.map_err(|e| ChannelError::Transport(e.to_string())),
        Err(_) => Err(ChannelError::Transport(format!(
            "write stalled for {}s",
            limit.as_secs()
        ))),
    }
}

async fn run_session<S>(
    state: &AppState,
    epoch: u64,
    sender: &mut SplitSink<WebSocket, Message>,
    reader: &mut TunnelReader<S>,
    outbound: &mut mpsc::Receiver<Vec<u8>>,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let period = state.config.heartbeat();
    let idle_limit = period * MISSED_HEARTBEATS;
    let mut heartbeat = interval(period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            inbound = reader.receive_next() => {
                match inbound {
                    Ok(resp) => {
                        state.pending.deliver(epoch, resp);
                    }
                    Err(e) => {
                        info!(epoch, reason = %e, "tunnel client disconnected");
                        break;
                    }
                }
            }
            frame = outbound.recv() => {
                match frame {
                    Some(data) => {
                        if let Err(e) = write_frame(sender, Message::Binary(data), period).await {
                            warn!(epoch, error = %e, "tunnel write failed");
                            break;
                        }
                    }
                    None => {
                        info!(epoch, "tunnel connection superseded");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if reader.idle() >= idle_limit {
                    warn!(epoch, idle_secs = reader.idle().as_secs(), "tunnel client unresponsive");
                    break;
                }
                if let Err(e) = write_frame(sender, Message::Ping(Vec::new()), period).await {
                    warn!(epoch, error = %e, "heartbeat write failed");
                    break;
                }
            }
        }
    }
}

/// Inbound half of the duplex channel
pub struct TunnelReader<S> {
    stream: S,
    last_seen: Instant,
}

impl<S> TunnelReader<S>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            last_seen: Instant::now(),
        }
    }

    /// Time since the last frame of any kind arrived
    pub fn idle(&self) -> Duration {
        self.last_seen.elapsed()
    }

    /// Wait for the next reply frame.
    ///
    /// Control frames and undecodable frames are skipped. Cancel safe: the
    /// only suspension point is the underlying stream.
    pub async fn receive_next(&mut self) -> Result<TunnelResponse, ChannelError> {
        loop {
            let frame = match self.stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    debug!(error = %e, "tunnel read error");
                    return Err(ChannelError::ConnectionClosed);
                }
                None => return Err(ChannelError::ConnectionClosed),
            };
            self.last_seen = Instant::now();

            let data = match frame {
                Message::Binary(data) => data,
                Message::Text(text) => text.into_bytes(),
                Message::Close(_) => return Err(ChannelError::ConnectionClosed),
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            match TunnelResponse::decode(&data) {
                Ok(resp) => return Ok(resp),
                Err(e) => warn!(len = data.len(), error = %e, "dropping malformed tunnel frame"),
            }
        }
    }
}
