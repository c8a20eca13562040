use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use souk_types::events::ServerEvent;
use souk_types::models::Identity;

pub type ConnectionId = Uuid;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    /// Close the socket with this code and stop writing.
    Close { code: u16, reason: &'static str },
}

/// One live duplex channel bound to exactly one identity.
///
/// Cloning is cheap; every clone feeds the same writer queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Arc<Identity>,
    tx: mpsc::UnboundedSender<Outbound>,
    alive: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(identity: Identity) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4(),
            identity: Arc::new(identity),
            tx,
            alive: Arc::new(AtomicBool::new(true)),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> Uuid {
        self.identity.user_id
    }

    /// Queue an event. Returns false if the writer is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.tx.send(Outbound::Close { code, reason });
    }

    /// Record a heartbeat answer.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Read and clear the heartbeat flag in one step.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }
}

/// Result of removing one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unregistered {
    /// That was the identity's last live connection.
    Last,
    /// Other connections of the identity remain.
    Remaining(usize),
    /// The connection was not registered (already removed).
    Unknown,
}

/// Authoritative mapping from identity to its live connections.
///
/// Any number of connections per identity (tabs, devices). All operations
/// take the lock briefly and never wait on a client.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<Uuid, HashMap<ConnectionId, ConnectionHandle>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection without evicting earlier ones for the same identity.
    /// Returns how many connections the identity now holds.
    pub async fn register(&self, handle: ConnectionHandle) -> usize {
        let mut users = self.inner.write().await;
        let conns = users.entry(handle.user_id()).or_default();
        conns.insert(handle.id(), handle);
        conns.len()
    }

    /// Remove exactly the given connection.
    pub async fn unregister(&self, user_id: Uuid, conn_id: ConnectionId) -> Unregistered {
        let mut users = self.inner.write().await;
        let Some(conns) = users.get_mut(&user_id) else {
            return Unregistered::Unknown;
        };
        if conns.remove(&conn_id).is_none() {
            return Unregistered::Unknown;
        }
        if conns.is_empty() {
            users.remove(&user_id);
            Unregistered::Last
        } else {
            Unregistered::Remaining(conns.len())
        }
    }

    pub async fn lookup(&self, user_id: Uuid) -> Vec<ConnectionHandle> {
        self.inner
            .read()
            .await
            .get(&user_id)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_reachable(&self, user_id: Uuid) -> bool {
        self.inner.read().await.contains_key(&user_id)
    }

    /// Send a targeted event to every connection of `user_id`.
    /// Returns how many connections accepted it; zero is not an error.
    pub async fn send_to(&self, user_id: Uuid, event: ServerEvent) -> usize {
        let users = self.inner.read().await;
        let Some(conns) = users.get(&user_id) else {
            debug!("send_to {}: no live connections", user_id);
            return 0;
        };
        conns.values().filter(|c| c.send(event.clone())).count()
    }

    /// Send an event to every live connection.
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        let users = self.inner.read().await;
        users
            .values()
            .flat_map(|conns| conns.values())
            .filter(|c| c.send(event.clone()))
            .count()
    }

    pub async fn connections(&self) -> Vec<ConnectionHandle> {
        self.inner
            .read()
            .await
            .values()
            .flat_map(|conns| conns.values().cloned())
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use souk_types::models::Role;

    use super::*;

    fn identity(user_id: Uuid) -> Identity {
        Identity {
            user_id,
            username: "amina".into(),
            role: Role::Seller,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }

    #[tokio::test]
    async fn register_keeps_earlier_connections() {
        let registry = Registry::new();
        let user = Uuid::new_v4();
        let (tab1, _rx1) = ConnectionHandle::new(identity(user));
        let (tab2, _rx2) = ConnectionHandle::new(identity(user));

        assert_eq!(registry.register(tab1.clone()).await, 1);
        assert_eq!(registry.register(tab2.clone()).await, 2);
        assert_eq!(registry.lookup(user).await.len(), 2);

        assert_eq!(
            registry.unregister(user, tab1.id()).await,
            Unregistered::Remaining(1)
        );
        assert!(registry.is_reachable(user).await);
        assert_eq!(registry.unregister(user, tab2.id()).await, Unregistered::Last);
        assert!(!registry.is_reachable(user).await);
    }

    #[tokio::test]
    async fn unregister_twice_is_unknown() {
        let registry = Registry::new();
        let user = Uuid::new_v4();
        let (conn, _rx) = ConnectionHandle::new(identity(user));
        registry.register(conn.clone()).await;

        assert_eq!(registry.unregister(user, conn.id()).await, Unregistered::Last);
        assert_eq!(registry.unregister(user, conn.id()).await, Unregistered::Unknown);
        assert_eq!(
            registry.unregister(Uuid::new_v4(), conn.id()).await,
            Unregistered::Unknown
        );
    }

    #[tokio::test]
    async fn send_to_reaches_every_tab_and_ignores_offline_users() {
        let registry = Registry::new();
        let user = Uuid::new_v4();
        let (tab1, mut rx1) = ConnectionHandle::new(identity(user));
        let (tab2, mut rx2) = ConnectionHandle::new(identity(user));
        registry.register(tab1).await;
        registry.register(tab2).await;

        let event = ServerEvent::Typing { sender_id: Uuid::new_v4() };
        assert_eq!(registry.send_to(user, event.clone()).await, 2);
        assert_eq!(drain(&mut rx1), vec![Outbound::Event(event.clone())]);
        assert_eq!(drain(&mut rx2), vec![Outbound::Event(event.clone())]);

        assert_eq!(registry.send_to(Uuid::new_v4(), event).await, 0);
    }

    #[tokio::test]
    async fn broadcast_skips_closed_writers() {
        let registry = Registry::new();
        let (a, mut rx_a) = ConnectionHandle::new(identity(Uuid::new_v4()));
        let (b, rx_b) = ConnectionHandle::new(identity(Uuid::new_v4()));
        registry.register(a).await;
        registry.register(b).await;
        drop(rx_b);

        let event = ServerEvent::HeartbeatProbe;
        assert_eq!(registry.broadcast(event.clone()).await, 1);
        assert_eq!(drain(&mut rx_a), vec![Outbound::Event(event)]);
        assert_eq!(registry.connection_count().await, 2);
    }

    #[test]
    fn alive_flag_is_consumed() {
        let (conn, _rx) = ConnectionHandle::new(identity(Uuid::new_v4()));
        assert!(conn.take_alive());
        assert!(!conn.take_alive());
        conn.mark_alive();
        assert!(conn.take_alive());
    }
}
