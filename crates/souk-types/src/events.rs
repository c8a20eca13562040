use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, MessageBody, Role};

/// Events sent FROM server TO client over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Server confirms successful authentication
    Ready {
        user_id: Uuid,
        username: String,
        role: Role,
        connection_id: Uuid,
    },

    /// An identity gained its first live connection
    UserOnline { user_id: Uuid },

    /// An identity lost its last connection and the debounce window elapsed
    UserOffline {
        user_id: Uuid,
        last_active_at: DateTime<Utc>,
    },

    /// Answer to `ClientCommand::QueryLastActive`
    LastActive {
        user_id: Uuid,
        online: bool,
        last_active_at: Option<DateTime<Utc>>,
    },

    /// Peer is typing. Not persisted, not acknowledged.
    Typing { sender_id: Uuid },

    /// A message addressed to this identity
    NewMessage { message: Message },

    /// Echo of a message this identity submitted, with its assigned id
    MessageSent { message: Message },

    MessageDelivered { message_id: Uuid, receiver_id: Uuid },

    MessageRead { message_id: Uuid, reader_id: Uuid },

    /// Submission could not be persisted; the message does not exist
    MessageFailed {
        client_nonce: Option<String>,
        receiver_id: Uuid,
        reason: String,
    },

    /// The conversation with `partner_id` changed; REST caches should refresh
    HistoryChanged { partner_id: Uuid },

    HeartbeatProbe,

    HeartbeatAck,

    Error { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Malformed,
    NotRecipient,
    UnknownMessage,
    StoreFailure,
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Authenticate a socket that carried no token at upgrade time
    Identify { token: String },

    SendMessage {
        receiver_id: Uuid,
        body: MessageBody,
        #[serde(default)]
        client_nonce: Option<String>,
    },

    Typing { receiver_id: Uuid },

    /// Explicit delivered acknowledgment from the receiving client
    AckDelivered { message_id: Uuid },

    MarkRead { message_ids: Vec<Uuid> },

    QueryLastActive { user_id: Uuid },

    HeartbeatProbe,

    HeartbeatAck,
}
