//! Authenticated REST surface next to the gateway: history, unread
//! messages and presence lookups.

pub mod error;
pub mod messages;
pub mod middleware;
pub mod presence;

use axum::{Router, routing::get};

use souk_gateway::Dispatcher;

/// All protected routes, sharing the gateway's dispatcher as state.
pub fn router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/messages/unread", get(messages::unread))
        .route("/messages/unread/count", get(messages::unread_count))
        .route("/messages/{partner_id}", get(messages::history))
        .route("/presence/{user_id}", get(presence::presence))
        .layer(axum::middleware::from_fn_with_state(
            dispatcher.clone(),
            middleware::require_auth,
        ))
        .with_state(dispatcher)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use tower::ServiceExt;
    use uuid::Uuid;

    use souk_db::MemoryStore;
    use souk_gateway::GatewayConfig;
    use souk_gateway::auth::JwtAuthenticator;
    use souk_types::api::{Claims, PresenceResponse, UnreadCountResponse};
    use souk_types::models::{DeliveryState, Message, MessageBody, Role};

    use super::*;

    const SECRET: &str = "api-test-secret";

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(MemoryStore::new()),
            Arc::new(JwtAuthenticator::new(SECRET)),
            GatewayConfig::default(),
        )
    }

    fn token(user_id: Uuid) -> String {
        let claims = Claims {
            sub: user_id,
            username: "amani".into(),
            role: Role::Buyer,
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    async fn get(dispatcher: &Dispatcher, uri: &str, user_id: Option<Uuid>) -> (StatusCode, Vec<u8>) {
        let mut req = Request::builder().uri(uri);
        if let Some(id) = user_id {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token(id)));
        }
        let res = router(dispatcher.clone())
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn rejects_missing_and_bad_tokens() {
        let d = dispatcher();
        let (status, _) = get(&d, "/messages/unread", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let res = router(d)
            .oneshot(
                Request::builder()
                    .uri("/messages/unread")
                    .header(header::AUTHORIZATION, "Bearer garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn history_fetch_marks_incoming_messages_delivered() {
        let d = dispatcher();
        let seller = Uuid::new_v4();
        let buyer = Uuid::new_v4();
        let sent = d
            .delivery()
            .submit(seller, buyer, MessageBody::text("still available?"), None)
            .await
            .unwrap();
        assert_eq!(sent.state, DeliveryState::Sent);

        let (status, body) = get(&d, &format!("/messages/{seller}"), Some(buyer)).await;
        assert_eq!(status, StatusCode::OK);
        let history: Vec<Message> = serde_json::from_slice(&body).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, DeliveryState::Delivered);

        // The sender's own view does not change anything further
        let (_, body) = get(&d, &format!("/messages/{buyer}"), Some(seller)).await;
        let history: Vec<Message> = serde_json::from_slice(&body).unwrap();
        assert_eq!(history[0].state, DeliveryState::Delivered);
    }

    #[tokio::test]
    async fn unread_count_drops_after_read() {
        let d = dispatcher();
        let seller = Uuid::new_v4();
        let buyer = Uuid::new_v4();
        let first = d
            .delivery()
            .submit(seller, buyer, MessageBody::text("one"), None)
            .await
            .unwrap();
        d.delivery()
            .submit(seller, buyer, MessageBody::text("two"), None)
            .await
            .unwrap();

        let (_, body) = get(&d, "/messages/unread/count", Some(buyer)).await;
        let count: UnreadCountResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(count.count, 2);

        d.delivery().acknowledge_read(first.id, buyer).await.unwrap();
        let (_, body) = get(&d, "/messages/unread", Some(buyer)).await;
        let unread: Vec<Message> = serde_json::from_slice(&body).unwrap();
        assert_eq!(unread.len(), 1);
        assert_ne!(unread[0].id, first.id);
    }

    #[tokio::test]
    async fn presence_of_unknown_identity_is_offline() {
        let d = dispatcher();
        let stranger = Uuid::new_v4();
        let (status, body) = get(&d, &format!("/presence/{stranger}"), Some(Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::OK);
        let presence: PresenceResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            presence,
            PresenceResponse {
                user_id: stranger,
                online: false,
                last_active_at: None,
            }
        );
    }
}
