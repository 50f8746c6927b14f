//! Correlation ID generation

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Produces process-unique correlation IDs.
///
/// IDs look like `r<boot>-<seq>`. The sequence number alone guarantees
/// uniqueness within one relay process; the boot stamp only keeps IDs from
/// different relay runs apart in client logs.
pub struct IdGenerator {
    boot: u64,
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        let boot = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64 & 0xFF_FFFF)
            .unwrap_or(0);
        Self {
            boot,
            next: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        format!("r{:x}-{:x}", self.boot, seq)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
