/// Row shape of the `messages` table.
/// Distinct from souk-types models to keep the DB layer independent.
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};

use souk_types::models::{DeliveryState, Message, MessageBody};

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub created_at: String,
    pub state: i64,
    pub client_nonce: Option<String>,
}

impl MessageRow {
    pub fn from_message(message: &Message) -> Result<Self> {
        Ok(Self {
            id: message.id.to_string(),
            sender_id: message.sender_id.to_string(),
            receiver_id: message.receiver_id.to_string(),
            body: serde_json::to_string(&message.body)?,
            created_at: format_timestamp(message.created_at),
            state: message.state.rank(),
            client_nonce: message.client_nonce.clone(),
        })
    }

    pub fn into_message(self) -> Result<Message> {
        let body: MessageBody = serde_json::from_str(&self.body)
            .map_err(|e| anyhow!("Corrupt body on message '{}': {}", self.id, e))?;
        let state = DeliveryState::from_rank(self.state)
            .ok_or_else(|| anyhow!("Corrupt state {} on message '{}'", self.state, self.id))?;

        Ok(Message {
            id: self.id.parse()?,
            sender_id: self.sender_id.parse()?,
            receiver_id: self.receiver_id.parse()?,
            body,
            created_at: self.created_at.parse::<DateTime<Utc>>()?,
            state,
            client_nonce: self.client_nonce,
        })
    }
}

/// Fixed-width RFC 3339 so that text ordering equals time ordering.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
