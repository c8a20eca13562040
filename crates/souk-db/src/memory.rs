use std::sync::Mutex;

use anyhow::{Result, anyhow};
use uuid::Uuid;

use souk_types::models::{DeliveryState, Message};

use crate::MessageStore;

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_messages<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Message>) -> Result<T>,
    {
        let mut messages = self
            .messages
            .lock()
            .map_err(|e| anyhow!("memory store lock poisoned: {}", e))?;
        f(&mut messages)
    }
}

impl MessageStore for MemoryStore {
    fn persist(&self, message: &Message) -> Result<Message> {
        self.with_messages(|messages| {
            if messages.iter().any(|m| m.id == message.id) {
                return Err(anyhow!("duplicate message id {}", message.id));
            }
            if let Some(nonce) = &message.client_nonce {
                if messages
                    .iter()
                    .any(|m| m.sender_id == message.sender_id && m.client_nonce.as_ref() == Some(nonce))
                {
                    return Err(anyhow!("duplicate nonce {} for sender {}", nonce, message.sender_id));
                }
            }
            messages.push(message.clone());
            Ok(message.clone())
        })
    }

    fn get(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_messages(|messages| Ok(messages.iter().find(|m| m.id == id).cloned()))
    }

    fn find_by_nonce(&self, sender_id: Uuid, nonce: &str) -> Result<Option<Message>> {
        self.with_messages(|messages| {
            Ok(messages
                .iter()
                .find(|m| m.sender_id == sender_id && m.client_nonce.as_deref() == Some(nonce))
                .cloned())
        })
    }

    fn update_state(&self, id: Uuid, state: DeliveryState) -> Result<bool> {
        self.with_messages(|messages| {
            match messages.iter_mut().find(|m| m.id == id) {
                Some(m) if m.state < state => {
                    m.state = state;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn fetch_history(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        self.with_messages(|messages| {
            let mut history: Vec<Message> = messages
                .iter()
                .filter(|m| {
                    (m.sender_id == a && m.receiver_id == b) || (m.sender_id == b && m.receiver_id == a)
                })
                .cloned()
                .collect();
            // Stable sort keeps insertion order for equal timestamps
            history.sort_by_key(|m| m.created_at);
            Ok(history)
        })
    }

    fn fetch_unread(&self, user_id: Uuid) -> Result<Vec<Message>> {
        self.with_messages(|messages| {
            let mut unread: Vec<Message> = messages
                .iter()
                .filter(|m| m.receiver_id == user_id && m.state < DeliveryState::Read)
                .cloned()
                .collect();
            unread.reverse();
            unread.sort_by(|x, y| y.created_at.cmp(&x.created_at));
            Ok(unread)
        })
    }
}

#[cfg(test)]
mod tests {
    use souk_types::models::MessageBody;

    use super::*;

    #[test]
    fn behaves_like_the_sqlite_store_on_state() {
        let store = MemoryStore::new();
        let msg = Message::new(Uuid::new_v4(), Uuid::new_v4(), MessageBody::text("hi"), None);
        store.persist(&msg).unwrap();

        assert!(store.update_state(msg.id, DeliveryState::Read).unwrap());
        assert!(!store.update_state(msg.id, DeliveryState::Delivered).unwrap());
        assert!(!store.update_state(Uuid::new_v4(), DeliveryState::Read).unwrap());
        assert!(store.fetch_unread(msg.receiver_id).unwrap().is_empty());
    }

    #[test]
    fn rejects_reused_nonce() {
        let store = MemoryStore::new();
        let sender = Uuid::new_v4();
        let first = Message::new(sender, Uuid::new_v4(), MessageBody::text("a"), Some("n".into()));
        let second = Message::new(sender, Uuid::new_v4(), MessageBody::text("b"), Some("n".into()));

        store.persist(&first).unwrap();
        assert!(store.persist(&second).is_err());
        assert_eq!(store.find_by_nonce(sender, "n").unwrap(), Some(first));
    }
}
