use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use uuid::Uuid;

use souk_db::{MemoryStore, MessageStore};
use souk_types::events::ServerEvent;
use souk_types::models::{DeliveryState, Identity, Message, Role};

use crate::auth::Authenticator;
use crate::config::GatewayConfig;
use crate::dispatcher::Dispatcher;
use crate::error::AuthError;
use crate::registry::Outbound;

/// Accepts tokens of the form `<uuid>`.
pub struct StaticAuth;

impl Authenticator for StaticAuth {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let user_id = token.parse().map_err(|_| AuthError::Invalid)?;
        Ok(Identity {
            user_id,
            username: format!("user-{token}"),
            role: Role::Buyer,
        })
    }
}

/// Store whose writes always fail.
pub struct FailingStore;

impl MessageStore for FailingStore {
    fn persist(&self, _message: &Message) -> anyhow::Result<Message> {
        Err(anyhow!("disk full"))
    }
    fn get(&self, _id: Uuid) -> anyhow::Result<Option<Message>> {
        Ok(None)
    }
    fn find_by_nonce(&self, _sender_id: Uuid, _nonce: &str) -> anyhow::Result<Option<Message>> {
        Ok(None)
    }
    fn update_state(&self, _id: Uuid, _state: DeliveryState) -> anyhow::Result<bool> {
        Err(anyhow!("disk full"))
    }
    fn fetch_history(&self, _a: Uuid, _b: Uuid) -> anyhow::Result<Vec<Message>> {
        Ok(Vec::new())
    }
    fn fetch_unread(&self, _user_id: Uuid) -> anyhow::Result<Vec<Message>> {
        Ok(Vec::new())
    }
}

pub fn identity(name: &str) -> Identity {
    Identity {
        user_id: Uuid::new_v4(),
        username: name.into(),
        role: Role::Buyer,
    }
}

pub fn dispatcher() -> (Dispatcher, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Dispatcher::new(store.clone(), Arc::new(StaticAuth), GatewayConfig::default());
    (dispatcher, store)
}

pub fn dispatcher_with(store: Arc<dyn MessageStore>) -> Dispatcher {
    Dispatcher::new(store, Arc::new(StaticAuth), GatewayConfig::default())
}

/// Everything queued so far, including close frames.
pub fn frames(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        out.push(frame);
    }
    out
}

/// Queued events only.
pub fn events(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerEvent> {
    frames(rx)
        .into_iter()
        .filter_map(|f| match f {
            Outbound::Event(e) => Some(e),
            Outbound::Close { .. } => None,
        })
        .collect()
}
