use thiserror::Error;
use uuid::Uuid;

use souk_types::close;
use souk_types::events::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authentication required")]
    Missing,
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
}

impl AuthError {
    pub fn close_code(self) -> u16 {
        match self {
            Self::Missing => close::AUTH_REQUIRED,
            Self::Invalid => close::AUTH_INVALID,
            Self::Expired => close::AUTH_EXPIRED,
        }
    }

    pub fn close_reason(self) -> &'static str {
        match self {
            Self::Missing => "Authentication required",
            Self::Invalid => "Invalid token",
            Self::Expired => "Token expired",
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("message store failure: {0}")]
    Store(anyhow::Error),

    #[error("{reader} is not the recipient of message {message_id}")]
    NotRecipient { message_id: Uuid, reader: Uuid },

    #[error("unknown message {0}")]
    UnknownMessage(Uuid),

    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl GatewayError {
    /// Code reported to the client in an `Error` event.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotRecipient { .. } => ErrorCode::NotRecipient,
            Self::UnknownMessage(_) => ErrorCode::UnknownMessage,
            Self::Store(_) | Self::Join(_) => ErrorCode::StoreFailure,
            Self::Auth(_) | Self::Malformed(_) => ErrorCode::Malformed,
        }
    }
}
