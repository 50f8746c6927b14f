//! The single duplex channel to the tunnel client
//!
//! Only one tunnel client is served at a time: installing a new connection
//! replaces the previous one (last registration wins) and bumps the epoch.
//! Outbound frames go through one bounded queue drained by the session loop,
//! which is the only task that ever writes to the socket.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::error::ChannelError;

/// Capacity of the outbound frame queue
pub const OUTBOUND_QUEUE: usize = 100;

struct ActiveConnection {
    epoch: u64,
    tx: mpsc::Sender<Vec<u8>>,
    connected_at: DateTime<Utc>,
}

/// Returned by [`DuplexChannel::set`] to the session that owns the socket
pub struct Installed {
    pub epoch: u64,
    /// Epoch of the connection that was displaced, if any
    pub previous: Option<u64>,
    /// Frames to write, in order
    pub outbound: mpsc::Receiver<Vec<u8>>,
}

/// Snapshot of the active connection
#[derive(Debug, Clone, Copy)]
pub struct ChannelStatus {
    pub epoch: u64,
    pub connected_at: DateTime<Utc>,
}

/// Versioned handle to the one active tunnel connection
pub struct DuplexChannel {
    active: RwLock<Option<ActiveConnection>>,
    last_epoch: AtomicU64,
}

impl DuplexChannel {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
            last_epoch: AtomicU64::new(0),
        }
    }

    /// Install a new connection, displacing the current one.
    ///
    /// Dropping the displaced sender closes its queue, which tells the old
    /// session loop to shut down. Pending requests of the old epoch are not
    /// touched here; the caller fails them.
    pub async fn set(&self) -> Installed {
        let (tx, outbound) = mpsc::channel(OUTBOUND_QUEUE);

        // Epochs are allocated under the write lock so installs stay monotonic
        let mut active = self.active.write().await;
        let epoch = self.last_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = active.replace(ActiveConnection {
            epoch,
            tx,
            connected_at: Utc::now(),
        });
        drop(active);

        let previous = previous.map(|p| p.epoch);
        if let Some(old) = previous {
            info!(epoch, previous = old, "tunnel connection replaced");
        }

        Installed {
            epoch,
            previous,
            outbound,
        }
    }

    pub async fn current_epoch(&self) -> Option<u64> {
        self.active.read().await.as_ref().map(|c| c.epoch)
    }

    pub async fn status(&self) -> Option<ChannelStatus> {
        self.active.read().await.as_ref().map(|c| ChannelStatus {
            epoch: c.epoch,
            connected_at: c.connected_at,
        })
    }

    /// Queue a frame on the connection identified by `epoch`.
    pub async fn send(&self, epoch: u64, frame: Vec<u8>) -> Result<(), ChannelError> {
        // Clone the sender and release the lock before awaiting queue space
        let tx = {
            let active = self.active.read().await;
            match active.as_ref() {
                None => return Err(ChannelError::NoActiveClient),
                Some(c) if c.epoch != epoch => {
                    return Err(ChannelError::Superseded {
                        expected: epoch,
                        current: Some(c.epoch),
                    })
                }
                Some(c) => c.tx.clone(),
            }
        };

        if tx.send(frame).await.is_err() {
            self.clear(epoch).await;
            return Err(ChannelError::Transport("session writer has stopped".into()));
        }
        Ok(())
    }

    /// Clear the active connection if it is still `epoch`.
    pub async fn clear(&self, epoch: u64) -> bool {
        let mut active = self.active.write().await;
        match active.as_ref() {
            Some(c) if c.epoch == epoch => {
                *active = None;
                debug!(epoch, "tunnel connection cleared");
                true
            }
            _ => false,
        }
    }
}

impl Default for DuplexChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_without_client() {
        let channel = DuplexChannel::new();
        assert!(channel.current_epoch().await.is_none());
        assert!(matches!(
            channel.send(1, b"x".to_vec()).await,
            Err(ChannelError::NoActiveClient)
        ));
    }

    #[tokio::test]
    async fn test_set_bumps_epoch_and_closes_previous_queue() {
        let channel = DuplexChannel::new();
        let mut first = channel.set().await;
        assert_eq!(first.epoch, 1);
        assert_eq!(first.previous, None);

        let second = channel.set().await;
        assert_eq!(second.epoch, 2);
        assert_eq!(second.previous, Some(1));
        assert_eq!(channel.current_epoch().await, Some(2));

        // Old session sees its queue closed
        assert!(first.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_is_ordered_and_epoch_checked() {
        let channel = DuplexChannel::new();
        let mut conn = channel.set().await;

        for i in 0..5u8 {
            channel.send(conn.epoch, vec![i]).await.unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(conn.outbound.recv().await, Some(vec![i]));
        }

        assert!(matches!(
            channel.send(conn.epoch + 1, vec![9]).await,
            Err(ChannelError::Superseded { .. })
        ));
    }

    #[tokio::test]
    async fn test_clear_only_matching_epoch() {
        let channel = DuplexChannel::new();
        let _old = channel.set().await;
        let new = channel.set().await;

        assert!(!channel.clear(1).await);
        assert_eq!(channel.current_epoch().await, Some(new.epoch));
        assert!(channel.clear(new.epoch).await);
        assert!(channel.status().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_writer_gone_tears_down() {
        let channel = DuplexChannel::new();
        let conn = channel.set().await;
        let epoch = conn.epoch;
        drop(conn);

        assert!(matches!(
            channel.send(epoch, b"x".to_vec()).await,
            Err(ChannelError::Transport(_))
        ));
        assert!(channel.current_epoch().await.is_none());
    }
}
