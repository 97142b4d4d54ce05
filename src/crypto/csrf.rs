use crate::error::{AppError, Result};
use crate::state::AppState;
use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;
use redis::AsyncCommands;

/// The size of random tokens in bytes.
const TOKEN_SIZE: usize = 32;
/// How long an issued CSRF token stays valid, in seconds.
pub const CSRF_TTL_SECS: u64 = 3600;

/// Generates a new random token.
///
/// # Returns
///
/// A URL-safe base64-encoded token.
pub fn generate_token() -> String {
    let mut token = [0u8; TOKEN_SIZE];
    OsRng.fill_bytes(&mut token);
    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

/// Generates a CSRF token and registers it in Redis.
///
/// # Returns
///
/// The token to hand out in the `csrf_token` cookie.
pub async fn issue_csrf_token(state: &AppState) -> Result<String> {
    let csrf_token = generate_token();
    tracing::debug!("🔐 Generated CSRF token: {}", &csrf_token[..20.min(csrf_token.len())]);

    let mut redis = state.redis.clone();
    let _: () = redis
        .set_ex(format!("csrf:{}", csrf_token), "valid", CSRF_TTL_SECS)
        .await
        .map_err(|e| {
            tracing::error!("❌ Redis set_ex failed for CSRF: {}", e);
            AppError::Redis(e)
        })?;

    Ok(csrf_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
