use std::collections::{HashSet, VecDeque};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use souk_types::models::Message;

pub const DEFAULT_CAPACITY: usize = 512;

/// Ways two deliveries can be recognised as the same message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DedupKey {
    Id(Uuid),
    Nonce(Uuid, String),
    /// Sender, receiver, timestamp and body hashed together. Catches a
    /// redelivery under a different id.
    Content(String),
}

fn keys(message: &Message) -> Vec<DedupKey> {
    let mut hasher = Sha256::new();
    hasher.update(message.sender_id.as_bytes());
    hasher.update(message.receiver_id.as_bytes());
    hasher.update(message.created_at.to_rfc3339().as_bytes());
    // MessageBody is plain data; serialising it cannot fail
    hasher.update(serde_json::to_vec(&message.body).unwrap_or_default());

    let mut keys = vec![
        DedupKey::Id(message.id),
        DedupKey::Content(hex::encode(hasher.finalize())),
    ];
    if let Some(nonce) = &message.client_nonce {
        keys.push(DedupKey::Nonce(message.sender_id, nonce.clone()));
    }
    keys
}

/// Bounded memory of recently surfaced messages.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    seen: HashSet<DedupKey>,
    order: VecDeque<Vec<DedupKey>>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `message`. Returns false if it was already surfaced.
    pub fn observe(&mut self, message: &Message) -> bool {
        let keys = keys(message);
        if keys.iter().any(|k| self.seen.contains(k)) {
            return false;
        }

        self.seen.extend(keys.iter().cloned());
        self.order.push_back(keys);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                for key in evicted {
                    self.seen.remove(&key);
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
