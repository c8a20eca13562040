use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use souk_types::timer::DelayedTask;

pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(3);

struct Indicator {
    generation: u64,
    timer: DelayedTask,
}

/// Per-peer typing indicators that switch themselves off.
///
/// Expiry is reported as `(peer, generation)` on the channel returned by
/// [`TypingTracker::new`]; the owner feeds it back through
/// [`TypingTracker::expire`], so all state stays with a single owner.
pub struct TypingTracker {
    expiry: Duration,
    generation: u64,
    active: HashMap<Uuid, Indicator>,
    expired: mpsc::UnboundedSender<(Uuid, u64)>,
}

impl TypingTracker {
    pub fn new(expiry: Duration) -> (Self, mpsc::UnboundedReceiver<(Uuid, u64)>) {
        let (expired, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            expiry,
            generation: 0,
            active: HashMap::new(),
            expired,
        };
        (tracker, rx)
    }

    /// A typing signal arrived from `peer`. Returns true if the indicator
    /// was off before; either way the expiry restarts.
    pub fn observe(&mut self, peer: Uuid) -> bool {
        self.generation += 1;
        let generation = self.generation;
        let expired = self.expired.clone();
        let timer = DelayedTask::spawn(self.expiry, async move {
            let _ = expired.send((peer, generation));
        });

        match self.active.insert(peer, Indicator { generation, timer }) {
            Some(previous) => {
                previous.timer.cancel();
                false
            }
            None => true,
        }
    }

    /// Handle an expiry notification. Returns true if the indicator went off.
    pub fn expire(&mut self, peer: Uuid, generation: u64) -> bool {
        match self.active.get(&peer) {
            Some(indicator) if indicator.generation == generation => {
                self.active.remove(&peer);
                true
            }
            _ => false,
        }
    }

    /// Switch the indicator off early. Returns true if it was on.
    pub fn stop(&mut self, peer: Uuid) -> bool {
        match self.active.remove(&peer) {
            Some(indicator) => {
                indicator.timer.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending expiry and return the peers that were typing.
    pub fn clear(&mut self) -> Vec<Uuid> {
        self.active
            .drain()
            .map(|(peer, indicator)| {
                indicator.timer.cancel();
                peer
            })
            .collect()
    }

    pub fn is_typing(&self, peer: Uuid) -> bool {
        self.active.contains_key(&peer)
    }
}
