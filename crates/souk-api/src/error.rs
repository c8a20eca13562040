use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use souk_gateway::{AuthError, GatewayError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Gateway(e) => match e {
                GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
                GatewayError::NotRecipient { .. } => StatusCode::FORBIDDEN,
                GatewayError::UnknownMessage(_) => StatusCode::NOT_FOUND,
                GatewayError::Malformed(_) => StatusCode::BAD_REQUEST,
                GatewayError::Store(_) | GatewayError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {:#}", self);
            // Store details stay in the log
            return (status, Json(json!({ "error": "internal error" }))).into_response();
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
