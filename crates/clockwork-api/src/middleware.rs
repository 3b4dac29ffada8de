use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use clockwork_types::api::Claims;

use crate::error::ApiError;
use crate::state::AppState;

/// Cookie set on login, read when no Authorization header is present.
pub const AUTH_COOKIE: &str = "clockwork_token";

pub fn create_token(secret: &str, user_id: Uuid, email: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Extract and validate the JWT from the Authorization header or the auth cookie.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let token = bearer
        .or_else(|| jar.get(AUTH_COOKIE).map(|c| c.value().to_string()))
        .ok_or_else(|| ApiError::Unauthorized("Authentication required".into()))?;

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.settings.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

/// Admin-only routes. Must run after [`require_auth`].
pub async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("Authentication required".into()))?;

    let account = state
        .db(move |db| db.get_account_by_id(claims.sub))
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".into()))?;

    if !account.is_active || !account.has_perm("notifications.change_broadcastnotification") {
        return Err(ApiError::Forbidden("Admin access required".into()));
    }
    Ok(next.run(req).await)
}
