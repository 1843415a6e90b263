use natp_types::Timestamp;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Default acceptance window, in seconds, either side of the receiver's clock.
pub const DEFAULT_REPLAY_WINDOW: i64 = 300;

/// Size below which recording never sweeps aged entries.
pub const PRUNE_FLOOR: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("timestamp {timestamp} outside the ±{window}s window around {now}")]
    Stale {
        timestamp: Timestamp,
        now: Timestamp,
        window: i64,
    },
    #[error("nonce {0} already seen")]
    Replayed(String),
}

/// Receiving-side replay protection keyed by `(sender, nonce)`.
///
/// An envelope is accepted once, and only while its timestamp is within
/// `window` seconds of the receiver's clock. Entries older than the window
/// are swept while recording, once the map doubles past its last pruned size,
/// so memory stays bounded by the traffic inside one window.
#[derive(Clone)]
pub struct ReplayGuard {
    seen: Arc<RwLock<Seen>>,
    window: i64,
}

struct Seen {
    entries: HashMap<String, Timestamp>,
    prune_at: usize,
}

impl Seen {
    fn prune(&mut self, cutoff: Timestamp) {
        self.entries.retain(|_, &mut ts| ts >= cutoff);
        self.prune_at = PRUNE_FLOOR.max(self.entries.len().saturating_mul(2));
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_WINDOW)
    }
}

impl ReplayGuard {
    pub fn new(window_seconds: i64) -> Self {
        Self {
            seen: Arc::new(RwLock::new(Seen {
                entries: HashMap::new(),
                prune_at: PRUNE_FLOOR,
            })),
            window: window_seconds,
        }
    }

    pub fn window(&self) -> i64 {
        self.window
    }

    /// Check freshness and record the nonce. Rejects replays and stale timestamps.
    pub fn check_and_record(
        &self,
        sender: &str,
        nonce: &str,
        timestamp: Timestamp,
        now: Timestamp,
    ) -> Result<(), ReplayError> {
        if now.abs_diff(timestamp) > self.window.unsigned_abs() {
            return Err(ReplayError::Stale {
                timestamp,
                now,
                window: self.window,
            });
        }

        let key = format!("{sender}:{nonce}");
        let mut seen = self.seen.write();
        if seen.entries.contains_key(&key) {
            return Err(ReplayError::Replayed(nonce.to_string()));
        }
        if seen.entries.len() >= seen.prune_at {
            seen.prune(self.cutoff(now));
        }
        seen.entries.insert(key, timestamp);
        Ok(())
    }

    /// Evict entries that have aged out of the window.
    pub fn evict(&self, now: Timestamp) {
        let cutoff = self.cutoff(now);
        self.seen.write().prune(cutoff);
    }

    fn cutoff(&self, now: Timestamp) -> Timestamp {
        now.saturating_sub(self.window.saturating_abs())
    }

    pub fn len(&self) -> usize {
        self.seen.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.read().entries.is_empty()
    }
}
