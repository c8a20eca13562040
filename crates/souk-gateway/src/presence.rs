use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

use souk_types::events::ServerEvent;
use souk_types::timer::DelayedTask;

use crate::clock::Clock;
use crate::registry::Registry;

/// Online/offline transition observed by in-process subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    Online { user_id: Uuid },
    Offline { user_id: Uuid, last_active_at: DateTime<Utc> },
}

/// Snapshot of one identity's presence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceRecord {
    pub online: bool,
    pub last_active_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct PresenceEntry {
    online: bool,
    last_active_at: Option<DateTime<Utc>>,
    pending: Option<PendingOffline>,
}

struct PendingOffline {
    generation: u64,
    disconnected_at: DateTime<Utc>,
    timer: DelayedTask,
}

/// Derives debounced online/offline state from connect/disconnect calls.
///
/// Records are created on first connect and never removed. A last-connection
/// disconnect only arms a timer; a reconnect inside the window cancels it and
/// observers never see the flap.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<PresenceInner>,
}

struct PresenceInner {
    registry: Registry,
    debounce: Duration,
    clock: Clock,
    entries: Mutex<HashMap<Uuid, PresenceEntry>>,
    generation: AtomicU64,
    changes: broadcast::Sender<PresenceChange>,
}

impl PresenceTracker {
    pub fn new(registry: Registry, debounce: Duration, clock: Clock) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(PresenceInner {
                registry,
                debounce,
                clock,
                entries: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                changes,
            }),
        }
    }

    pub fn clock(&self) -> Clock {
        self.inner.clock
    }

    /// Subscribe to presence transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceChange> {
        self.inner.changes.subscribe()
    }

    /// Call after a connection for `user_id` has been registered.
    pub async fn on_connect(&self, user_id: Uuid) {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries.entry(user_id).or_default();

        if let Some(pending) = entry.pending.take() {
            pending.timer.cancel();
            debug!("{} reconnected inside the debounce window", user_id);
        }

        if !entry.online {
            entry.online = true;
            info!("{} is online", user_id);
            // Published under the entry lock so per-identity order holds
            self.publish(PresenceChange::Online { user_id }).await;
        }
    }

    /// Call after the identity's last connection has been unregistered.
    pub async fn on_disconnect(&self, user_id: Uuid) {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries.entry(user_id).or_default();

        if let Some(previous) = entry.pending.take() {
            previous.timer.cancel();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let tracker = self.clone();
        let timer = DelayedTask::spawn(self.inner.debounce, async move {
            tracker.expire(user_id, generation).await;
        });

        entry.pending = Some(PendingOffline {
            generation,
            disconnected_at: self.inner.clock.now(),
            timer,
        });
        debug!("{} lost last connection, offline in {:?}", user_id, self.inner.debounce);
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.record(user_id).await.is_some_and(|r| r.online)
    }

    pub async fn last_active(&self, user_id: Uuid) -> Option<DateTime<Utc>> {
        self.record(user_id).await.and_then(|r| r.last_active_at)
    }

    pub async fn record(&self, user_id: Uuid) -> Option<PresenceRecord> {
        self.inner
            .entries
            .lock()
            .await
            .get(&user_id)
            .map(|e| PresenceRecord {
                online: e.online,
                last_active_at: e.last_active_at,
            })
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner
            .entries
            .lock()
            .await
            .iter()
            .filter(|(_, e)| e.online)
            .map(|(id, _)| *id)
            .collect()
    }

    async fn expire(&self, user_id: Uuid, generation: u64) {
        // The registry decides reachability; a connection that registered
        // but has not reached on_connect yet still keeps the identity online.
        let reachable = self.inner.registry.is_reachable(user_id).await;

        let mut entries = self.inner.entries.lock().await;
        let Some(entry) = entries.get_mut(&user_id) else {
            return;
        };
        let Some(pending) = entry.pending.take_if(|p| p.generation == generation) else {
            return;
        };
        if reachable {
            return;
        }

        entry.last_active_at = Some(pending.disconnected_at);
        if entry.online {
            entry.online = false;
            info!("{} is offline", user_id);
            self.publish(PresenceChange::Offline {
                user_id,
                last_active_at: pending.disconnected_at,
            })
            .await;
        }
    }

    async fn publish(&self, change: PresenceChange) {
        let event = match &change {
            PresenceChange::Online { user_id } => ServerEvent::UserOnline { user_id: *user_id },
            PresenceChange::Offline {
                user_id,
                last_active_at,
            } => ServerEvent::UserOffline {
                user_id: *user_id,
                last_active_at: *last_active_at,
            },
        };
        self.inner.registry.broadcast(event).await;
        let _ = self.inner.changes.send(change);
    }
}
