use chrono::Utc;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::crypto::password::{hash_password, verify_password};
use crate::error::{AppError, Result};
use crate::models::identity::Email;
use crate::models::session::Session;
use crate::models::user::{User, UserProfile};
use crate::repositories::user as user_repo;
use crate::state::AppState;

/// Redis key of a platform session.
pub fn session_key(session_id: &Uuid) -> String {
    format!("session:{}", session_id)
}

/// Creates a new platform user.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `name` - The user's name.
/// * `username` - The user's username.
/// * `email` - The user's normalized email.
/// * `password` - The user's password.
///
/// # Returns
///
/// A `Result` containing the created `User`.
pub async fn create_user(
    state: &AppState,
    name: &str,
    username: &str,
    email: &Email,
    password: &str,
) -> Result<User> {
    tracing::debug!("🔐 Creating user: {}", username);

    if user_repo::exists(&state.db, username, email.as_str()).await? {
        return Err(AppError::Validation(
            "Username or email already registered".to_string(),
        ));
    }

    let hashed_password = hash_password(password)?;
    let user = user_repo::create_user(&state.db, name, username, email.as_str(), &hashed_password).await?;

    tracing::info!("✅ User created with ID: {}", user.id);
    Ok(user)
}

/// Authenticates a platform user.
///
/// # Returns
///
/// A `Result` containing the authenticated `User`.
pub async fn authenticate_user(state: &AppState, username: &str, password: &str) -> Result<User> {
    tracing::debug!("🔐 Authenticating user: {}", username);

    let user = user_repo::find_by_username(&state.db, username)
        .await?
        .ok_or_else(|| AppError::Authentication("Invalid username or password".to_string()))?;

    if !verify_password(password, &user.password)? {
        return Err(AppError::Authentication(
            "Invalid username or password".to_string(),
        ));
    }

    tracing::info!("✅ User authenticated: {}", user.id);
    Ok(user)
}

/// Stores a new platform session for `user` in Redis.
///
/// # Returns
///
/// The session ID to put in the `session_id` cookie.
pub async fn start_session(state: &AppState, user: &User) -> Result<Uuid> {
    let session_id = Uuid::new_v4();
    tracing::debug!("🔑 Generated session_id: {}", session_id);

    let session = Session {
        user_id: user.id,
        email: user.email.clone(),
        is_admin: user.is_admin(),
        created_at: Utc::now(),
        expires_at: Utc::now() + chrono::Duration::days(state.config.session_duration_days),
    };

    let session_json = sonic_rs::to_string(&session)
        .map_err(|e| AppError::Internal(format!("Session serialization failed: {}", e)))?;

    let expiration_seconds: u64 = (state.config.session_duration_days * 86400) as u64;
    let mut redis = state.redis.clone();
    let _: () = redis
        .set_ex(session_key(&session_id), &session_json, expiration_seconds)
        .await
        .map_err(|e| {
            tracing::error!("❌ Redis set_ex failed: {}", e);
            AppError::Redis(e)
        })?;

    tracing::info!("✅ Session saved to Redis: session:{}", session_id);
    Ok(session_id)
}

/// Loads a live platform session.
///
/// Missing, unparsable and expired sessions all yield `None`; expired and
/// unparsable entries are deleted.
pub async fn load_session(state: &AppState, session_id: &Uuid) -> Result<Option<Session>> {
    let mut redis = state.redis.clone();
    let key = session_key(session_id);

    let session_json: Option<String> = redis.get(&key).await?;
    let Some(session_json) = session_json else {
        return Ok(None);
    };

    let session: Session = match sonic_rs::from_str(&session_json) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("❌ Invalid session JSON: {}", e);
            let _: () = redis.del(&key).await.unwrap_or(());
            return Ok(None);
        }
    };

    if Utc::now() > session.expires_at {
        tracing::warn!("❌ Session expired for user: {}", session.user_id);
        let _: () = redis.del(&key).await.unwrap_or(());
        return Ok(None);
    }

    Ok(Some(session))
}

/// Deletes a platform session.
pub async fn end_session(state: &AppState, session_id: &Uuid) -> Result<()> {
    let mut redis = state.redis.clone();
    let _: () = redis.del(session_key(session_id)).await?;
    tracing::info!("✅ Session deleted from Redis");
    Ok(())
}

/// Loads an account that may still act on the platform.
async fn active_user(state: &AppState, user_id: &Uuid) -> Result<User> {
    let user = user_repo::find_by_id(&state.db, user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !user.is_active {
        tracing::warn!("🚫 Deactivated user {} used a live session", user_id);
        return Err(AppError::Unauthorized);
    }
    Ok(user)
}

/// The profile of a signed-in user.
pub async fn profile(state: &AppState, user_id: Uuid) -> Result<UserProfile> {
    let user = active_user(state, &user_id).await?;
    Ok(UserProfile::from(&user))
}

/// Changes a user's password.
///
/// # Returns
///
/// A `Result<()>`.
pub async fn change_password(
    state: &AppState,
    user_id: Uuid,
    old_password: &str,
    new_password: &str,
) -> Result<()> {
    tracing::info!("🔑 Changing password for user: {}", user_id);

    let user = active_user(state, &user_id).await?;

    if !verify_password(old_password, &user.password)? {
        return Err(AppError::Authentication(
            "Invalid current password".to_string(),
        ));
    }

    let new_hashed_password = hash_password(new_password)?;
    user_repo::update_password(&state.db, &user_id, &new_hashed_password).await?;

    tracing::info!("✅ Password changed for user: {}", user_id);
    Ok(())
}
