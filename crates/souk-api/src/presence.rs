use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use souk_gateway::Dispatcher;
use souk_types::api::PresenceResponse;

/// Presence of any identity. Never-seen identities are reported offline
/// with no last-active time.
pub async fn presence(
    State(dispatcher): State<Dispatcher>,
    Path(user_id): Path<Uuid>,
) -> Json<PresenceResponse> {
    let record = dispatcher.presence().record(user_id).await;
    Json(PresenceResponse {
        user_id,
        online: record.is_some_and(|r| r.online),
        last_active_at: record.and_then(|r| r.last_active_at),
    })
}
