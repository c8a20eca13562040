use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use souk_db::MessageStore;
use souk_types::close;
use souk_types::events::{ClientCommand, ServerEvent};
use souk_types::models::Identity;

use crate::auth::Authenticator;
use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::delivery::DeliveryEngine;
use crate::error::{AuthError, GatewayError};
use crate::presence::PresenceTracker;
use crate::registry::{ConnectionHandle, Outbound, Registry, Unregistered};

/// Wires connections to the registry, presence tracker and delivery engine,
/// and dispatches inbound commands.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: Registry,
    presence: PresenceTracker,
    delivery: DeliveryEngine,
    auth: Arc<dyn Authenticator>,
    config: GatewayConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        auth: Arc<dyn Authenticator>,
        config: GatewayConfig,
    ) -> Self {
        let registry = Registry::new();
        let presence = PresenceTracker::new(registry.clone(), config.offline_debounce, Clock::new());
        let delivery = DeliveryEngine::new(store, registry.clone());
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                presence,
                delivery,
                auth,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.inner.presence
    }

    pub fn delivery(&self) -> &DeliveryEngine {
        &self.inner.delivery
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        self.inner.auth.verify(token)
    }

    /// Bind an authenticated identity to a new connection.
    ///
    /// The returned queue already holds `Ready` followed by a snapshot of who
    /// is online; the identity's own online transition follows.
    pub async fn attach(&self, identity: Identity) -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::new(identity);
        let me = handle.identity();

        handle.send(ServerEvent::Ready {
            user_id: me.user_id,
            username: me.username.clone(),
            role: me.role,
            connection_id: handle.id(),
        });

        // Registered before the snapshot, so a transition published in
        // between reaches this queue as well. A repeated UserOnline is harmless.
        let count = self.inner.registry.register(handle.clone()).await;
        info!(
            "{} ({}) connected [{} live connection(s)]",
            me.username, me.user_id, count
        );
        for user_id in self.inner.presence.online_users().await {
            if user_id != me.user_id {
                handle.send(ServerEvent::UserOnline { user_id });
            }
        }
        self.inner.presence.on_connect(me.user_id).await;

        (handle, rx)
    }

    /// Remove a connection. Safe to call more than once.
    pub async fn detach(&self, handle: &ConnectionHandle) {
        let user_id = handle.user_id();
        match self.inner.registry.unregister(user_id, handle.id()).await {
            Unregistered::Last => {
                info!("{} ({}) has no live connections", handle.identity().username, user_id);
                self.inner.presence.on_disconnect(user_id).await;
            }
            Unregistered::Remaining(n) => {
                debug!("{} ({}) still has {} connection(s)", handle.identity().username, user_id, n);
            }
            Unregistered::Unknown => {}
        }
    }

    /// Force-close a connection and run the normal disconnect path.
    pub async fn evict(&self, handle: &ConnectionHandle, code: u16, reason: &'static str) {
        handle.close(code, reason);
        self.detach(handle).await;
    }

    /// Administrative disconnect of every connection an identity holds.
    /// Returns how many connections were closed.
    pub async fn disconnect_user(&self, user_id: Uuid) -> usize {
        let conns = self.inner.registry.lookup(user_id).await;
        for conn in &conns {
            self.evict(conn, close::SERVER_DISCONNECT, "Disconnected by server").await;
        }
        if !conns.is_empty() {
            info!("{} disconnected by server ({} connection(s))", user_id, conns.len());
        }
        conns.len()
    }

    /// Handle one inbound command from `conn`.
    ///
    /// Callers must not start the next command from the same connection
    /// before this one returns; that is what keeps per-connection order.
    pub async fn on_event(&self, conn: &ConnectionHandle, cmd: ClientCommand) -> Result<(), GatewayError> {
        let user_id = conn.user_id();
        match cmd {
            ClientCommand::Identify { .. } => {
                debug!("{} sent Identify on an authenticated connection", user_id);
                Ok(())
            }

            ClientCommand::SendMessage {
                receiver_id,
                body,
                client_nonce,
            } => {
                let result = self
                    .inner
                    .delivery
                    .submit(user_id, receiver_id, body, client_nonce.clone())
                    .await;
                match result {
                    Ok(_) => Ok(()),
                    Err(GatewayError::Store(e)) => {
                        warn!("{} -> {}: message not persisted: {:#}", user_id, receiver_id, e);
                        conn.send(ServerEvent::MessageFailed {
                            client_nonce,
                            receiver_id,
                            reason: "message could not be saved".into(),
                        });
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }

            ClientCommand::Typing { receiver_id } => {
                trace!("{} typing to {}", user_id, receiver_id);
                self.inner
                    .registry
                    .send_to(receiver_id, ServerEvent::Typing { sender_id: user_id })
                    .await;
                Ok(())
            }

            ClientCommand::AckDelivered { message_id } => {
                self.inner.delivery.acknowledge_delivered(message_id, user_id).await?;
                Ok(())
            }

            ClientCommand::MarkRead { message_ids } => {
                let mut first_error = None;
                for message_id in message_ids {
                    if let Err(e) = self.inner.delivery.acknowledge_read(message_id, user_id).await {
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }

            ClientCommand::QueryLastActive { user_id: target } => {
                let record = self.inner.presence.record(target).await;
                conn.send(ServerEvent::LastActive {
                    user_id: target,
                    online: record.is_some_and(|r| r.online),
                    last_active_at: record.and_then(|r| r.last_active_at),
                });
                Ok(())
            }

            ClientCommand::HeartbeatProbe => {
                conn.send(ServerEvent::HeartbeatAck);
                Ok(())
            }

            ClientCommand::HeartbeatAck => {
                conn.mark_alive();
                Ok(())
            }
        }
    }

    /// Log a failed command and tell the client, keeping the connection open.
    pub fn report(&self, conn: &ConnectionHandle, err: &GatewayError) {
        warn!(
            "{} ({}) event dropped: {}",
            conn.identity().username,
            conn.user_id(),
            err
        );
        conn.send(ServerEvent::Error {
            code: err.code(),
            message: err.to_string(),
        });
    }
}
