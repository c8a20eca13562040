use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use souk_gateway::{AuthError, Dispatcher};

use crate::error::ApiError;

/// Verify the bearer token with the gateway's authenticator and make the
/// resulting `Identity` available as a request extension.
pub async fn require_auth(
    State(dispatcher): State<Dispatcher>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(AuthError::Missing)?;
    let identity = dispatcher.authenticate(bearer.token())?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
