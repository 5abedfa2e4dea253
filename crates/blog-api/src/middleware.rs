use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::auth::{AppState, decode_token};
use crate::error::ApiError;
use crate::store;

/// Extract and validate JWT from Authorization header, then record the
/// user's activity as `last_seen`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized)?;

    let claims = decode_token(&state.config.jwt_secret, token).ok_or(ApiError::Unauthorized)?;

    // Tokens outlive deleted accounts; reject those here.
    let user_id = claims.sub;
    store::transact(&state, move |session| {
        if session.user_by_id(user_id)?.is_none() {
            return Err(ApiError::Unauthorized.into());
        }
        session.touch_last_seen(user_id, chrono::Utc::now())
    })
    .await?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
