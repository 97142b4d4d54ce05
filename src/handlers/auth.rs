use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    Extension, Json,
};
use garde::Validate;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::{
    cookies::{create_secure_cookie, expired_cookie, member_session_cookies, CSRF_COOKIE, SESSION_COOKIE},
    crypto::csrf::{issue_csrf_token, CSRF_TTL_SECS},
    error::{AppError, Result},
    middleware_layer::auth::extract_session_token,
    models::{identity::Email, session::Session, user::User},
    response::json,
    services::{auth as auth_service, identity as identity_service},
    state::AppState,
    validation::auth::*,
};

/// The request payload for user registration.
#[derive(Deserialize, Validate)]
pub struct RegisterRequest {
    #[garde(length(min = 1, max = 120))]
    pub name: String,
    #[garde(length(min = 3, max = 255))]
    pub username: String,
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 8, max = 128))]
    pub password: String,
}

/// The request payload for user login.
#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[garde(length(min = 3, max = 255))]
    pub username: String,
    #[garde(length(min = 1, max = 128))]
    pub password: String,
}

/// The request payload for changing a user's password.
#[derive(Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[garde(length(min = 1, max = 128))]
    pub old_password: String,
    #[garde(length(min = 8, max = 128))]
    pub new_password: String,
}

/// The response payload for authentication-related requests.
#[derive(Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
struct CsrfResponse {
    csrf_token: String,
}

/// Starts a platform session for `user` and sets the session and CSRF cookies.
async fn sign_in(state: &AppState, cookies: &Cookies, user: &User) -> Result<()> {
    let session_id = auth_service::start_session(state, user).await?;
    cookies.add(create_secure_cookie(
        SESSION_COOKIE,
        session_id.to_string(),
        state.config.session_duration_days * 86400,
    ));
    tracing::info!("✅ Session cookie added: session_id={}", session_id);

    let csrf_token = issue_csrf_token(state).await?;
    cookies.add(create_secure_cookie(CSRF_COOKIE, csrf_token, CSRF_TTL_SECS as i64));
    tracing::info!("✅ CSRF cookie added");
    Ok(())
}

/// Handles user registration.
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response> {
    tracing::info!("📝 Register attempt: {}", payload.username);
    payload.validate()?;
    validate_username(&payload.username)?;
    validate_password(&payload.password)?;
    validate_name(&payload.name)?;

    let email = Email::parse(&payload.email)
        .ok_or_else(|| AppError::Validation("Invalid email".to_string()))?;

    let user = auth_service::create_user(
        &state,
        payload.name.trim(),
        &payload.username,
        &email,
        &payload.password,
    )
    .await?;
    tracing::info!("✅ User registered: {}", user.id);

    sign_in(&state, &cookies, &user).await?;

    json(
        StatusCode::CREATED,
        &AuthResponse {
            success: true,
            message: "Registration successful. Welcome!".to_string(),
        },
    )
}

/// Handles user login.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<Response> {
    tracing::info!("🔐 Login attempt: {}", payload.username);
    payload.validate()?;
    validate_username(&payload.username)?;

    let user = auth_service::authenticate_user(&state, &payload.username, &payload.password).await?;
    sign_in(&state, &cookies, &user).await?;
    tracing::info!("✅ User logged in: {}", user.id);

    json(
        StatusCode::OK,
        &AuthResponse {
            success: true,
            message: "Login successful".to_string(),
        },
    )
}

/// Handles user logout.
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    cookies: Cookies,
) -> Result<Response> {
    tracing::info!("👋 Logout for user: {}", session.user_id);

    let session_id = extract_session_token(&cookies).ok_or(AppError::Unauthorized)?;
    auth_service::end_session(&state, &session_id).await?;

    if let Some(csrf_cookie) = cookies.get(CSRF_COOKIE) {
        let mut redis = state.redis.clone();
        let _: () = redis
            .del(format!("csrf:{}", csrf_cookie.value()))
            .await
            .unwrap_or(());
        tracing::info!("✅ CSRF token deleted from Redis");
    }

    // Member areas may hold mirrors of this session.
    let member_sessions = member_session_cookies(&cookies);
    let tokens: Vec<String> = member_sessions.iter().map(|(_, token)| token.clone()).collect();
    identity_service::clear_persisted(&state, &tokens).await?;
    for (name, _) in member_sessions {
        cookies.add(expired_cookie(name));
    }

    cookies.add(expired_cookie(SESSION_COOKIE));
    cookies.add(expired_cookie(CSRF_COOKIE));

    tracing::info!("✅ User logged out: {}", session.user_id);

    json(
        StatusCode::OK,
        &AuthResponse {
            success: true,
            message: "Logout successful".to_string(),
        },
    )
}

/// Handles changing a user's password.
#[axum::debug_handler]
pub async fn change_password(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Response> {
    tracing::info!("🔑 Change password for user: {}", session.user_id);
    payload.validate()?;
    validate_password(&payload.new_password)?;

    auth_service::change_password(
        &state,
        session.user_id,
        &payload.old_password,
        &payload.new_password,
    )
    .await?;

    json(
        StatusCode::OK,
        &AuthResponse {
            success: true,
            message: "Password changed successfully".to_string(),
        },
    )
}

/// Rotates the CSRF token of a signed-in user.
pub async fn refresh_csrf(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    cookies: Cookies,
) -> Result<Response> {
    let csrf_token = issue_csrf_token(&state).await?;
    cookies.add(create_secure_cookie(CSRF_COOKIE, csrf_token.clone(), CSRF_TTL_SECS as i64));
    tracing::debug!("🔐 CSRF token rotated for user: {}", session.user_id);
    json(StatusCode::OK, &CsrfResponse { csrf_token })
}

/// Returns the signed-in platform user.
pub async fn me(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response> {
    let profile = auth_service::profile(&state, session.user_id).await?;
    json(StatusCode::OK, &profile)
}
