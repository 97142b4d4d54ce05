use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    cookies::{create_secure_cookie, expired_cookie, member_session_cookie},
    error::AppError,
    middleware_layer::auth::extract_session_token,
    services::identity::{self as identity_service, IdentityParams, MemberResolution},
    state::AppState,
};

/// A middleware that resolves the acting student of a member area.
///
/// The area comes from the `{area_id}` path segment. On success the
/// `Identity` is inserted as a request extension, and a freshly issued
/// virtual session is handed back in the area's member session cookie.
pub async fn require_member(
    State(state): State<AppState>,
    Path(path): Path<HashMap<String, String>>,
    Query(params): Query<IdentityParams>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(area_id) = path.get("area_id").and_then(|id| Uuid::parse_str(id).ok()) else {
        return AppError::NotFound.into_response();
    };

    let cookie_name = member_session_cookie(&area_id);
    let member_token = cookies.get(&cookie_name).map(|c| c.value().to_string());
    let session_id = extract_session_token(&cookies);

    let resolved = match identity_service::resolve(
        &state,
        area_id,
        &params,
        member_token.as_deref(),
        session_id,
    )
    .await
    {
        Ok(MemberResolution::Resolved(resolved)) => resolved,
        Ok(MemberResolution::Unauthenticated { redirect, clear_cookie }) => {
            if clear_cookie {
                cookies.add(expired_cookie(cookie_name));
            }
            return AppError::Unauthenticated { redirect }.into_response();
        }
        Err(e) => return e.into_response(),
    };

    if let Some(token) = resolved.issued_token {
        let max_age = state.config.member_session_ttl_ms / 1000;
        cookies.add(create_secure_cookie(cookie_name, token, max_age));
    }

    tracing::debug!(
        "✅ Member resolved: {} in area {} ({:?})",
        resolved.identity.email,
        area_id,
        resolved.identity.source
    );
    request.extensions_mut().insert(resolved.identity);
    next.run(request).await
}
