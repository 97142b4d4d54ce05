use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use sonic_rs::JsonValueTrait;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{identity::Email, session::Session},
    state::AppState,
};

const MAX_LOGIN_BODY_BYTES: usize = 16 * 1024;

/// Extracts the peer IP address from the request extensions.
fn extract_real_ip(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Reads the attempt counter behind `key`. Returns the remaining TTL in
/// seconds when `limit` is reached.
async fn exhausted(state: &AppState, key: &str, limit: i32) -> Option<i32> {
    let count: Option<i32> = redis::cmd("GET")
        .arg(key)
        .query_async(&mut state.redis.clone())
        .await
        .unwrap_or(None);

    if count.unwrap_or(0) < limit {
        return None;
    }

    let ttl: Option<i32> = redis::cmd("TTL")
        .arg(key)
        .query_async(&mut state.redis.clone())
        .await
        .unwrap_or(None);
    Some(ttl.unwrap_or(0).max(0))
}

/// Counts one attempt against `key`, expiring the window after `window_secs`.
async fn count_attempt(state: &AppState, key: &str, window_secs: u64) {
    let _: () = redis::pipe()
        .cmd("INCR")
        .arg(key)
        .ignore()
        .cmd("EXPIRE")
        .arg(key)
        .arg(window_secs)
        .ignore()
        .query_async(&mut state.redis.clone())
        .await
        .unwrap_or(());
}

async fn clear_attempts(state: &AppState, key: &str) {
    let _: () = redis::cmd("DEL")
        .arg(key)
        .query_async(&mut state.redis.clone())
        .await
        .unwrap_or(());
}

/// Buffers a JSON body and returns the string field `field`, normalized by
/// `normalize`, together with a rebuilt request.
async fn peek_json_field(
    req: Request<Body>,
    field: &str,
    normalize: impl Fn(&str) -> Option<String>,
) -> Result<(Option<String>, Request<Body>), Response> {
    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, MAX_LOGIN_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return Err(AppError::Validation("Request body too large".to_string()).into_response());
        }
    };

    let value = sonic_rs::from_slice::<sonic_rs::Value>(&body_bytes)
        .ok()
        .and_then(|json| json.get(field).and_then(|v| v.as_str()).and_then(&normalize));

    Ok((value, Request::from_parts(parts, Body::from(body_bytes))))
}

/// A middleware that rate limits platform registration per IP.
pub async fn rate_limit_register(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_real_ip(&req);
    let key = format!("rate_limit:register:{}", ip);

    if let Some(ttl) = exhausted(&state, &key, 3).await {
        return AppError::RateLimitExceeded(format!(
            "Registration limit exceeded. Try again in {} minutes",
            ttl / 60
        ))
        .into_response();
    }

    count_attempt(&state, &key, 43200).await;
    next.run(req).await
}

/// A middleware that rate limits failed platform logins per username.
pub async fn rate_limit_login(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (username, req) =
        match peek_json_field(req, "username", |s| Some(s.trim().to_lowercase())).await {
            Ok(peeked) => peeked,
            Err(response) => return response,
        };
    let key = format!("rate_limit:login:{}", username.unwrap_or_else(|| "unknown".to_string()));

    if let Some(ttl) = exhausted(&state, &key, 5).await {
        return AppError::RateLimitExceeded(format!(
            "Too many failed login attempts. Try again in {} minutes",
            ttl / 60
        ))
        .into_response();
    }

    let response = next.run(req).await;

    if response.status().is_client_error() {
        count_attempt(&state, &key, 43200).await;
    } else if response.status().is_success() {
        clear_attempts(&state, &key).await;
    }

    response
}

/// A middleware that rate limits failed custom logins per area and email.
pub async fn rate_limit_member_login(
    State(state): State<AppState>,
    Path(area_id): Path<Uuid>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (email, req) =
        match peek_json_field(req, "email", |s| Email::parse(s).map(|e| e.to_string())).await {
            Ok(peeked) => peeked,
            Err(response) => return response,
        };
    let key = format!(
        "rate_limit:member_login:{}:{}",
        area_id,
        email.unwrap_or_else(|| "unknown".to_string())
    );

    if let Some(ttl) = exhausted(&state, &key, 5).await {
        return AppError::RateLimitExceeded(format!(
            "Too many failed login attempts. Try again in {} minutes",
            ttl / 60
        ))
        .into_response();
    }

    let response = next.run(req).await;

    if response.status().is_client_error() {
        count_attempt(&state, &key, 3600).await;
    } else if response.status().is_success() {
        clear_attempts(&state, &key).await;
    }

    response
}

/// A middleware that rate limits successful password changes per user.
pub async fn rate_limit_change_password(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = format!("rate_limit:change_password:{}", session.user_id);

    if let Some(ttl) = exhausted(&state, &key, 2).await {
        return AppError::RateLimitExceeded(format!(
            "Password change limit exceeded. Try again in {} hours",
            ttl / 3600
        ))
        .into_response();
    }

    let response = next.run(req).await;

    if response.status().is_success() {
        count_attempt(&state, &key, 86400).await;
    }

    response
}
