use reqwest::Client;
use uuid::Uuid;

use souk_types::api::{PresenceResponse, UnreadCountResponse};
use souk_types::models::Message;

use crate::error::ClientError;

/// REST companion to [`crate::ChatSession`], used to refresh a
/// conversation after `HistoryChanged`.
#[derive(Clone)]
pub struct HistoryClient {
    http: Client,
    base_url: String,
    token: String,
}

impl HistoryClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let res = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(res.json().await?)
    }

    /// Conversation with `partner_id`, oldest first. Fetching marks
    /// incoming `Sent` messages as delivered.
    pub async fn history(&self, partner_id: Uuid) -> Result<Vec<Message>, ClientError> {
        self.get(&format!("/messages/{partner_id}")).await
    }

    pub async fn unread(&self) -> Result<Vec<Message>, ClientError> {
        self.get("/messages/unread").await
    }

    pub async fn unread_count(&self) -> Result<usize, ClientError> {
        let res: UnreadCountResponse = self.get("/messages/unread/count").await?;
        Ok(res.count)
    }

    pub async fn presence(&self, user_id: Uuid) -> Result<PresenceResponse, ClientError> {
        self.get(&format!("/presence/{user_id}")).await
    }
}
