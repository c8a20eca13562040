use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
}

/// Verified identity bound to a connection for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

/// Lifecycle stage of a message. The derived ordering is the lifecycle
/// order, so a stored state may only ever be replaced by a greater one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
}

/// Outcome of asking a state to move to another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// One of the two legal forward edges.
    Advance,
    /// Target is equal to or behind the current state; nothing to do.
    Stale,
    /// Sent -> Read. Delivery has to be recorded first.
    Skip,
}

impl DeliveryState {
    pub fn transition(self, next: DeliveryState) -> Transition {
        match (self, next) {
            (Self::Sent, Self::Delivered) | (Self::Delivered, Self::Read) => Transition::Advance,
            (Self::Sent, Self::Read) => Transition::Skip,
            _ => Transition::Stale,
        }
    }

    /// Integer form used for storage and monotone SQL updates.
    pub fn rank(self) -> i64 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Self::Sent),
            1 => Some(Self::Delivered),
            2 => Some(Self::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text {
        text: String,
    },
    Media {
        media_type: MediaKind,
        url: String,
        file_name: Option<String>,
        file_size: Option<u64>,
    },
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text { text } => text.trim().is_empty(),
            Self::Media { url, .. } => url.is_empty(),
        }
    }
}

/// A direct message between two identities. Everything except `state` is
/// fixed once the message has been submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
    pub state: DeliveryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_nonce: Option<String>,
}

impl Message {
    /// Fresh message in the `Sent` state with a server-assigned id and timestamp.
    /// The timestamp is truncated to microseconds, the precision the store keeps.
    pub fn new(
        sender_id: Uuid,
        receiver_id: Uuid,
        body: MessageBody,
        client_nonce: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            body,
            created_at: Utc::now().trunc_subsecs(6),
            state: DeliveryState::Sent,
            client_nonce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_edges_advance() {
        assert_eq!(
            DeliveryState::Sent.transition(DeliveryState::Delivered),
            Transition::Advance
        );
        assert_eq!(
            DeliveryState::Delivered.transition(DeliveryState::Read),
            Transition::Advance
        );
    }

    #[test]
    fn sent_to_read_is_a_skip() {
        assert_eq!(
            DeliveryState::Sent.transition(DeliveryState::Read),
            Transition::Skip
        );
    }

    #[test]
    fn backward_and_repeated_transitions_are_stale() {
        for (from, to) in [
            (DeliveryState::Read, DeliveryState::Delivered),
            (DeliveryState::Read, DeliveryState::Sent),
            (DeliveryState::Delivered, DeliveryState::Sent),
            (DeliveryState::Delivered, DeliveryState::Delivered),
            (DeliveryState::Read, DeliveryState::Read),
        ] {
            assert_eq!(from.transition(to), Transition::Stale, "{from:?} -> {to:?}");
        }
    }

    #[test]
    fn rank_matches_ordering() {
        assert!(DeliveryState::Sent < DeliveryState::Delivered);
        assert!(DeliveryState::Delivered < DeliveryState::Read);
        for state in [DeliveryState::Sent, DeliveryState::Delivered, DeliveryState::Read] {
            assert_eq!(DeliveryState::from_rank(state.rank()), Some(state));
        }
        assert_eq!(DeliveryState::from_rank(7), None);
    }

    #[test]
    fn body_wire_shape() {
        let json = serde_json::to_value(MessageBody::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "text", "text": "hi" }));
        assert!(MessageBody::text("   ").is_empty());
    }
}
