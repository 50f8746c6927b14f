//! In-flight request correlation
//!
//! Maps correlation IDs to single-use reply slots. Entries are created and
//! removed only by the gateway call that owns them; the session reader loop
//! fills slots but never removes entries.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use revtun_shared::protocol::TunnelResponse;

use crate::error::GatewayError;

/// Terminal result written into a reply slot
#[derive(Debug)]
pub enum Reply {
    Response(TunnelResponse),
    Disconnected,
}

/// Outcome of routing an inbound reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No entry, or the slot was already resolved
    Unknown,
    /// Entry belongs to a different connection epoch
    Stale,
}

struct PendingEntry {
    slot: Option<oneshot::Sender<Reply>>,
    epoch: u64,
    created_at: Instant,
}

/// Concurrency-safe map of correlation ID → pending request
#[derive(Default)]
pub struct CorrelationTable {
    entries: DashMap<String, PendingEntry>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending entry owned by the returned guard.
    pub fn register(&self, id: &str, epoch: u64) -> Result<Pending<'_>, GatewayError> {
        let (tx, rx) = oneshot::channel();
        match self.entries.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(GatewayError::DuplicateId(id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(PendingEntry {
                    slot: Some(tx),
                    epoch,
                    created_at: Instant::now(),
                });
                Ok(Pending {
                    table: self,
                    id: id.to_string(),
                    slot: rx,
                })
            }
        }
    }

    /// Route a reply received on connection `epoch` to its waiting gateway.
    pub fn deliver(&self, epoch: u64, response: TunnelResponse) -> Delivery {
        let Some(mut entry) = self.entries.get_mut(&response.id) else {
            debug!(id = %response.id, "dropping late reply");
            return Delivery::Unknown;
        };

        if entry.epoch != epoch {
            debug!(id = %response.id, owner = entry.epoch, epoch, "dropping stale reply");
            return Delivery::Stale;
        }

        let age_ms = entry.created_at.elapsed().as_millis() as u64;
        match entry.slot.take() {
            Some(tx) => {
                // The receiver may have just timed out; that's a late reply.
                let _ = tx.send(Reply::Response(response));
                debug!(epoch, age_ms, "reply delivered");
                Delivery::Delivered
            }
            None => {
                debug!(id = %response.id, "slot already resolved, dropping reply");
                Delivery::Unknown
            }
        }
    }

    /// Resolve every unresolved entry of `epoch` with [`Reply::Disconnected`].
    pub fn fail_epoch(&self, epoch: u64) -> usize {
        let mut failed = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.epoch != epoch {
                continue;
            }
            if let Some(tx) = entry.slot.take() {
                let _ = tx.send(Reply::Disconnected);
                failed += 1;
            }
        }
        failed
    }

    fn remove(&self, id: &str) {
        self.entries.remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Scoped ownership of one table entry.
///
/// Dropping the guard removes the entry, whatever the outcome of the call
/// (including the HTTP handler future being cancelled).
pub struct Pending<'a> {
    table: &'a CorrelationTable,
    id: String,
    slot: oneshot::Receiver<Reply>,
}

impl Pending<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the slot to be filled. A dropped sender counts as a disconnect.
    pub async fn wait(&mut self) -> Reply {
        (&mut self.slot).await.unwrap_or(Reply::Disconnected)
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
