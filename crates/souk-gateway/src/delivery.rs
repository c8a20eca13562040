use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use souk_db::MessageStore;
use souk_types::events::ServerEvent;
use souk_types::models::{DeliveryState, Message, MessageBody, Transition};

use crate::error::GatewayError;
use crate::registry::Registry;

/// Entries kept in memory before settled ones are dropped. The store holds
/// the durable state, so an evicted entry is simply reloaded on next use.
const TRACKED_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Tracked {
    sender_id: Uuid,
    receiver_id: Uuid,
    state: DeliveryState,
}

enum Stored {
    Fresh(Message),
    Existing(Message),
}

impl From<&Message> for Tracked {
    fn from(m: &Message) -> Self {
        Self {
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
            state: m.state,
        }
    }
}

/// Drives messages through Sent → Delivered → Read.
///
/// One lock covers routing and every transition, so receipts reach the
/// sender only after the store has committed the state they announce, and
/// a message's state is never observed going backwards.
#[derive(Clone)]
pub struct DeliveryEngine {
    store: Arc<dyn MessageStore>,
    registry: Registry,
    tracked: Arc<Mutex<HashMap<Uuid, Tracked>>>,
}

impl DeliveryEngine {
    pub fn new(store: Arc<dyn MessageStore>, registry: Registry) -> Self {
        Self {
            store,
            registry,
            tracked: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persist a new message and route it to the receiver's live connections.
    ///
    /// A repeated `client_nonce` from the same sender returns the earlier
    /// message instead of creating a second one. If that message never got
    /// past Sent it is routed again, since the first attempt may have been
    /// cut off between persisting and routing. On a store failure nothing
    /// is routed and the error is returned to the caller.
    pub async fn submit(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        body: MessageBody,
        client_nonce: Option<String>,
    ) -> Result<Message, GatewayError> {
        if body.is_empty() {
            return Err(GatewayError::Malformed("empty message body".into()));
        }
        if sender_id == receiver_id {
            return Err(GatewayError::Malformed("cannot message yourself".into()));
        }

        // Held from the nonce lookup through routing so two submits with the
        // same nonce cannot both miss the lookup and race on the insert.
        let mut tracked = self.tracked.lock().await;
        let message = Message::new(sender_id, receiver_id, body, client_nonce);
        let mut message = match self.persist_or_find(message).await? {
            Stored::Fresh(message) => message,
            Stored::Existing(existing) => {
                let state = tracked
                    .get(&existing.id)
                    .map_or(existing.state, |t| t.state.max(existing.state));
                let existing = Message { state, ..existing };
                if state != DeliveryState::Sent {
                    debug!("resubmission of {} by {}, not routing again", existing.id, sender_id);
                    self.registry
                        .send_to(sender_id, ServerEvent::MessageSent { message: existing.clone() })
                        .await;
                    return Ok(existing);
                }
                debug!("resubmission of {} by {} is still Sent, routing again", existing.id, sender_id);
                existing
            }
        };
        let receiver_id = message.receiver_id;

        Self::make_room(&mut tracked);
        tracked.insert(message.id, Tracked::from(&message));

        self.registry
            .send_to(sender_id, ServerEvent::MessageSent { message: message.clone() })
            .await;
        let reached = self
            .registry
            .send_to(receiver_id, ServerEvent::NewMessage { message: message.clone() })
            .await;

        // Delivered means "handed to at least one live connection"
        if reached > 0 && self.commit(&mut tracked, message.id, DeliveryState::Delivered).await? {
            message.state = DeliveryState::Delivered;
        }
        drop(tracked);

        self.registry
            .send_to(sender_id, ServerEvent::HistoryChanged { partner_id: receiver_id })
            .await;
        self.registry
            .send_to(receiver_id, ServerEvent::HistoryChanged { partner_id: sender_id })
            .await;

        info!("{} -> {}: message {} ({:?})", sender_id, receiver_id, message.id, message.state);
        Ok(message)
    }

    /// Insert `message`, or return the row already stored under its nonce.
    /// A failed insert is re-checked against the nonce, since another
    /// process sharing the store may have won the unique constraint.
    async fn persist_or_find(&self, message: Message) -> Result<Stored, GatewayError> {
        let Some(nonce) = message.client_nonce.clone() else {
            let stored = self.blocking(move |store| store.persist(&message)).await?;
            return Ok(Stored::Fresh(stored));
        };
        let sender_id = message.sender_id;

        let lookup = nonce.clone();
        if let Some(existing) = self
            .blocking(move |store| store.find_by_nonce(sender_id, &lookup))
            .await?
        {
            return Ok(Stored::Existing(existing));
        }

        match self.blocking(move |store| store.persist(&message)).await {
            Ok(stored) => Ok(Stored::Fresh(stored)),
            Err(err) => {
                let found = self
                    .blocking(move |store| store.find_by_nonce(sender_id, &nonce))
                    .await?;
                match found {
                    Some(existing) => {
                        warn!("nonce of {} stored concurrently: {}", existing.id, err);
                        Ok(Stored::Existing(existing))
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Record delivery to `receiver_id`. Returns false if already recorded.
    pub async fn acknowledge_delivered(
        &self,
        message_id: Uuid,
        receiver_id: Uuid,
    ) -> Result<bool, GatewayError> {
        let mut tracked = self.tracked.lock().await;
        let entry = self.load(&mut tracked, message_id).await?;
        if entry.receiver_id != receiver_id {
            return Err(GatewayError::NotRecipient {
                message_id,
                reader: receiver_id,
            });
        }

        match entry.state.transition(DeliveryState::Delivered) {
            Transition::Advance => self.commit(&mut tracked, message_id, DeliveryState::Delivered).await,
            Transition::Stale | Transition::Skip => Ok(false),
        }
    }

    /// Record that `reader_id` read the message. Read is per identity: the
    /// first acknowledgment from any of its connections wins and exactly one
    /// receipt reaches the sender.
    pub async fn acknowledge_read(
        &self,
        message_id: Uuid,
        reader_id: Uuid,
    ) -> Result<bool, GatewayError> {
        let mut tracked = self.tracked.lock().await;
        let entry = self.load(&mut tracked, message_id).await?;
        if entry.receiver_id != reader_id {
            return Err(GatewayError::NotRecipient {
                message_id,
                reader: reader_id,
            });
        }

        match entry.state.transition(DeliveryState::Read) {
            Transition::Stale => Ok(false),
            Transition::Advance => self.commit(&mut tracked, message_id, DeliveryState::Read).await,
            Transition::Skip => {
                // The reader has the message, so delivery happened; record it first
                self.commit(&mut tracked, message_id, DeliveryState::Delivered).await?;
                self.commit(&mut tracked, message_id, DeliveryState::Read).await
            }
        }
    }

    /// Conversation history as seen by `reader_id`. Messages addressed to the
    /// reader that were still Sent are recorded Delivered at fetch time.
    pub async fn fetch_history(
        &self,
        reader_id: Uuid,
        partner_id: Uuid,
    ) -> Result<Vec<Message>, GatewayError> {
        let mut history = self
            .blocking(move |store| store.fetch_history(reader_id, partner_id))
            .await?;

        for message in history
            .iter_mut()
            .filter(|m| m.receiver_id == reader_id && m.state == DeliveryState::Sent)
        {
            self.acknowledge_delivered(message.id, reader_id).await?;
            message.state = DeliveryState::Delivered;
        }
        Ok(history)
    }

    pub async fn fetch_unread(&self, user_id: Uuid) -> Result<Vec<Message>, GatewayError> {
        self.blocking(move |store| store.fetch_unread(user_id)).await
    }

    /// Current state of a message as tracked by the engine.
    pub async fn state_of(&self, message_id: Uuid) -> Result<DeliveryState, GatewayError> {
        let mut tracked = self.tracked.lock().await;
        Ok(self.load(&mut tracked, message_id).await?.state)
    }

    async fn load(
        &self,
        tracked: &mut HashMap<Uuid, Tracked>,
        message_id: Uuid,
    ) -> Result<Tracked, GatewayError> {
        if let Some(entry) = tracked.get(&message_id) {
            return Ok(*entry);
        }
        let message = self
            .blocking(move |store| store.get(message_id))
            .await?
            .ok_or(GatewayError::UnknownMessage(message_id))?;

        let entry = Tracked::from(&message);
        Self::make_room(tracked);
        tracked.insert(message_id, entry);
        Ok(entry)
    }

    /// Apply one forward edge: store first, then memory, then the receipt.
    async fn commit(
        &self,
        tracked: &mut HashMap<Uuid, Tracked>,
        message_id: Uuid,
        state: DeliveryState,
    ) -> Result<bool, GatewayError> {
        let mut entry = self.load(tracked, message_id).await?;
        if entry.state.transition(state) != Transition::Advance {
            return Ok(false);
        }

        // `false` here means the store was already at or past `state`
        self.blocking(move |store| store.update_state(message_id, state))
            .await?;
        entry.state = state;

        let receipt = match state {
            DeliveryState::Delivered => ServerEvent::MessageDelivered {
                message_id,
                receiver_id: entry.receiver_id,
            },
            DeliveryState::Read => ServerEvent::MessageRead {
                message_id,
                reader_id: entry.receiver_id,
            },
            DeliveryState::Sent => return Ok(false),
        };

        if state == DeliveryState::Read {
            tracked.remove(&message_id);
        } else {
            tracked.insert(message_id, entry);
        }

        debug!("message {} is now {:?}", message_id, state);
        self.registry.send_to(entry.sender_id, receipt).await;
        Ok(true)
    }

    fn make_room(tracked: &mut HashMap<Uuid, Tracked>) {
        if tracked.len() >= TRACKED_CAPACITY {
            tracked.retain(|_, t| t.state == DeliveryState::Sent);
            if tracked.len() >= TRACKED_CAPACITY {
                tracked.clear();
            }
        }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce(&dyn MessageStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await?
            .map_err(GatewayError::Store)
    }
}
