use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    cookies::SESSION_COOKIE,
    error::AppError,
    services::auth as auth_service,
    state::AppState,
};

/// Extracts the platform session ID from the request cookies.
pub fn extract_session_token(cookies: &Cookies) -> Option<Uuid> {
    cookies
        .get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

/// A middleware that requires a live platform session.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The downstream `Response`, or 403 when no live session exists. The
/// loaded `Session` is inserted as a request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    tracing::debug!("🔐 Checking authentication...");

    let Some(session_id) = extract_session_token(&cookies) else {
        tracing::warn!("❌ No session_id cookie found");
        return AppError::Unauthorized.into_response();
    };

    let session = match auth_service::load_session(&state, &session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            tracing::warn!("❌ Session {} missing or expired", session_id);
            return AppError::Unauthorized.into_response();
        }
        Err(e) => return e.into_response(),
    };

    tracing::debug!("✅ User authenticated: {}", session.user_id);
    request.extensions_mut().insert(session);
    next.run(request).await
}
