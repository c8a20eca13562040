use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::debug;
use uuid::Uuid;

use souk_gateway::Dispatcher;
use souk_types::api::UnreadCountResponse;
use souk_types::models::{Identity, Message};

use crate::error::ApiError;

/// Conversation with `partner_id`, oldest first. Messages addressed to the
/// caller that were still `Sent` come back `Delivered`, and their senders
/// get the receipt.
pub async fn history(
    State(dispatcher): State<Dispatcher>,
    Path(partner_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = dispatcher
        .delivery()
        .fetch_history(identity.user_id, partner_id)
        .await?;
    debug!(
        "{} fetched {} message(s) with {}",
        identity.user_id,
        messages.len(),
        partner_id
    );
    Ok(Json(messages))
}

/// Messages addressed to the caller that are not yet read, newest first.
pub async fn unread(
    State(dispatcher): State<Dispatcher>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = dispatcher.delivery().fetch_unread(identity.user_id).await?;
    Ok(Json(messages))
}

pub async fn unread_count(
    State(dispatcher): State<Dispatcher>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let count = dispatcher.delivery().fetch_unread(identity.user_id).await?.len();
    Ok(Json(UnreadCountResponse { count }))
}
