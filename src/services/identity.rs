//! Resolves the acting student of a member area.
//!
//! Precedence, first match wins:
//! 1. `?verified=true&email=...` synthesizes a virtual identity and never
//!    yields a redirect.
//! 2. A persisted session younger than its TTL is restored. Mirrors of a
//!    platform session are only restored while that session is live, and
//!    the roster cohort is re-read on every request.
//! 3. A live platform session is adopted and mirrored into the cache.
//! 4. Otherwise the caller is unauthenticated and is sent to the area login,
//!    unless it runs embedded in a host app.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::Deserialize;
use uuid::Uuid;

use crate::crypto::csrf::generate_token;
use crate::crypto::password::verify_password;
use crate::error::{AppError, Result};
use crate::models::identity::{
    CohortMembership, Email, Identity, IdentitySource, PersistedSession,
};
use crate::repositories::member_area as area_repo;
use crate::services::auth as auth_service;
use crate::state::AppState;

/// Query parameters that take part in identity resolution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityParams {
    pub verified: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub embedded: bool,
}

/// A live platform session, already checked against the area.
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub email: Email,
    pub is_admin: bool,
    pub is_owner: bool,
}

/// Inputs of one resolution.
#[derive(Debug, Clone)]
pub struct ResolveInput<'a> {
    pub area_id: Uuid,
    pub params: &'a IdentityParams,
    /// Raw persisted session JSON, if a cache entry exists.
    pub persisted: Option<&'a str>,
    pub live: Option<LiveSession>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// An identity was found. `persist` asks the caller to write a fresh
    /// cache entry for it.
    Resolved { identity: Identity, persist: bool },
    Unauthenticated { redirect: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOutcome {
    pub resolution: Resolution,
    /// The persisted entry was corrupt or stale and must be deleted.
    pub clear_persisted: bool,
}

/// The login screen of a member area.
pub fn login_path(area_id: Uuid) -> String {
    format!("/members/{}/login", area_id)
}

/// Resolves an identity from already-loaded inputs. Performs no I/O.
pub fn resolve_identity(input: ResolveInput<'_>, ttl_ms: i64, now: DateTime<Utc>) -> ResolveOutcome {
    let mut clear_persisted = false;

    if input.params.verified.as_deref() == Some("true") {
        if let Some(email) = input.params.email.as_deref().and_then(Email::parse) {
            return ResolveOutcome {
                resolution: Resolution::Resolved {
                    identity: Identity::student(input.area_id, email, IdentitySource::VerifiedLink),
                    persist: true,
                },
                clear_persisted,
            };
        }
    }

    if let Some(raw) = input.persisted {
        match sonic_rs::from_str::<PersistedSession>(raw) {
            Ok(persisted) => match persisted.into_entry(ttl_ms) {
                Some(entry) if entry.is_expired(now) => clear_persisted = true,
                Some(entry) if entry.identity.area_id != input.area_id => {}
                // A platform mirror only lives as long as the platform session.
                Some(entry)
                    if entry.identity.source == IdentitySource::Platform
                        && input.live.as_ref().map(|live| &live.email) != Some(&entry.identity.email) =>
                {
                    clear_persisted = true
                }
                Some(entry) => {
                    return ResolveOutcome {
                        resolution: Resolution::Resolved {
                            identity: entry.identity,
                            persist: false,
                        },
                        clear_persisted,
                    };
                }
                None => clear_persisted = true,
            },
            Err(_) => clear_persisted = true,
        }
    }

    if let Some(live) = input.live {
        let mut identity = Identity::student(input.area_id, live.email, IdentitySource::Platform);
        identity.is_admin = live.is_admin;
        identity.is_owner = live.is_owner;
        return ResolveOutcome {
            resolution: Resolution::Resolved {
                identity,
                persist: true,
            },
            clear_persisted,
        };
    }

    let redirect = (!input.params.embedded).then(|| login_path(input.area_id));
    ResolveOutcome {
        resolution: Resolution::Unauthenticated { redirect },
        clear_persisted,
    }
}

/// Redis key of a persisted member session.
fn member_session_key(token: &str) -> String {
    format!("member_session:{}", token)
}

/// A resolved identity plus the cache token issued for it, if any.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    pub issued_token: Option<String>,
}

/// Looks up the roster cohort of a student. Lookup failures yield
/// [`CohortMembership::Unknown`].
async fn cohort_membership(state: &AppState, area_id: &Uuid, email: &Email) -> CohortMembership {
    match area_repo::find_student(&state.db, area_id, email).await {
        Ok(Some(student)) => CohortMembership::from_option(student.cohort_id),
        Ok(None) => CohortMembership::Unassigned,
        Err(e) => {
            tracing::warn!("⚠️ Cohort lookup failed for {}: {}", email, e);
            CohortMembership::Unknown
        }
    }
}

/// Reads the raw persisted session behind a cookie token.
async fn load_persisted(state: &AppState, token: Option<&str>) -> Option<String> {
    let token = token?;
    let mut redis = state.redis.clone();
    match redis.get::<_, Option<String>>(member_session_key(token)).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("⚠️ Member session read failed, treating as cache miss: {}", e);
            None
        }
    }
}

/// Adopts the platform session behind the `session_id` cookie, if live.
async fn load_live(state: &AppState, area_id: &Uuid, session_id: Option<Uuid>) -> Option<LiveSession> {
    let session_id = session_id?;
    let session = match auth_service::load_session(state, &session_id).await {
        Ok(session) => session?,
        Err(e) => {
            tracing::warn!("⚠️ Platform session read failed: {}", e);
            return None;
        }
    };
    let email = Email::parse(&session.email)?;

    let is_owner = match area_repo::find_area(&state.db, area_id).await {
        Ok(Some(area)) => area.owner_id == session.user_id,
        Ok(None) => false,
        Err(e) => {
            tracing::warn!("⚠️ Area owner lookup failed: {}", e);
            false
        }
    };

    Some(LiveSession {
        email,
        is_admin: session.is_admin,
        is_owner,
    })
}

/// Writes a persisted copy of `identity` and returns its cookie token.
pub async fn persist(state: &AppState, identity: &Identity) -> Result<String> {
    let token = generate_token();
    let persisted = PersistedSession::new(identity.clone(), token.clone(), Utc::now());
    let json = sonic_rs::to_string(&persisted)
        .map_err(|e| AppError::Internal(format!("Member session serialization failed: {}", e)))?;

    let ttl_secs = (state.config.member_session_ttl_ms / 1000).max(1) as u64;
    let mut redis = state.redis.clone();
    let _: () = redis.set_ex(member_session_key(&token), json, ttl_secs).await?;

    tracing::info!("✅ Member session persisted for {} ({:?})", identity.email, identity.source);
    Ok(token)
}

/// What the member middleware should do with a request.
#[derive(Debug, Clone)]
pub enum MemberResolution {
    Resolved(ResolvedIdentity),
    /// No identity. `clear_cookie` is set only when the area's persisted
    /// entry was stale or corrupt and has been deleted.
    Unauthenticated {
        redirect: Option<String>,
        clear_cookie: bool,
    },
}

/// Resolves the acting student for a request.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `area_id` - The member area being accessed.
/// * `params` - The `verified`, `email` and `embedded` query parameters.
/// * `member_token` - The area's member session cookie, if present.
/// * `session_id` - The platform `session_id` cookie, if present.
///
/// # Returns
///
/// The identity, or the redirect to send an unauthenticated caller to.
pub async fn resolve(
    state: &AppState,
    area_id: Uuid,
    params: &IdentityParams,
    member_token: Option<&str>,
    session_id: Option<Uuid>,
) -> Result<MemberResolution> {
    let (persisted, live) = tokio::join!(
        load_persisted(state, member_token),
        load_live(state, &area_id, session_id),
    );

    let outcome = resolve_identity(
        ResolveInput {
            area_id,
            params,
            persisted: persisted.as_deref(),
            live,
        },
        state.config.member_session_ttl_ms,
        Utc::now(),
    );

    if outcome.clear_persisted {
        if let Some(token) = member_token {
            tracing::debug!("🧹 Clearing stale or corrupt member session");
            let mut redis = state.redis.clone();
            let _: () = redis.del(member_session_key(token)).await.unwrap_or(());
        }
    }

    match outcome.resolution {
        Resolution::Resolved { mut identity, persist } => {
            // Roster edits apply without a new login.
            identity.cohort = cohort_membership(state, &area_id, &identity.email).await;
            let issued_token = if persist {
                Some(self::persist(state, &identity).await?)
            } else {
                None
            };
            Ok(MemberResolution::Resolved(ResolvedIdentity {
                identity,
                issued_token,
            }))
        }
        Resolution::Unauthenticated { redirect } => Ok(MemberResolution::Unauthenticated {
            redirect,
            clear_cookie: outcome.clear_persisted && member_token.is_some(),
        }),
    }
}

/// Deletes the persisted member sessions behind `tokens`.
pub async fn clear_persisted(state: &AppState, tokens: &[String]) -> Result<()> {
    if tokens.is_empty() {
        return Ok(());
    }
    let keys: Vec<String> = tokens.iter().map(|t| member_session_key(t)).collect();
    let mut redis = state.redis.clone();
    let _: () = redis.del(keys).await?;
    tracing::info!("✅ {} member session(s) cleared", tokens.len());
    Ok(())
}

/// Custom login against the area roster.
///
/// # Returns
///
/// The identity and the cookie token of its new virtual session.
pub async fn login(state: &AppState, area_id: Uuid, email: &Email, password: &str) -> Result<ResolvedIdentity> {
    tracing::debug!("🔐 Member login attempt: {} in area {}", email, area_id);

    let invalid = || AppError::Authentication("Invalid email or password".to_string());
    let student = area_repo::find_student(&state.db, &area_id, email)
        .await?
        .ok_or_else(invalid)?;
    let hash = student.password_hash.as_deref().ok_or_else(invalid)?;

    if !verify_password(password, hash)? {
        return Err(invalid());
    }

    let mut identity = Identity::student(area_id, email.clone(), IdentitySource::CustomLogin);
    identity.cohort = CohortMembership::from_option(student.cohort_id);

    let token = persist(state, &identity).await?;
    tracing::info!("✅ Member logged in: {}", email);

    Ok(ResolvedIdentity {
        identity,
        issued_token: Some(token),
    })
}

/// Clears the persisted copy and the live platform session.
pub async fn logout(state: &AppState, member_token: Option<&str>, session_id: Option<Uuid>) -> Result<()> {
    if let Some(token) = member_token {
        let mut redis = state.redis.clone();
        let _: () = redis.del(member_session_key(token)).await?;
        tracing::info!("✅ Member session cleared");
    }
    if let Some(session_id) = session_id {
        auth_service::end_session(state, &session_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const DAY_MS: i64 = 86_400_000;

    fn params(verified: Option<&str>, email: Option<&str>) -> IdentityParams {
        IdentityParams {
            verified: verified.map(String::from),
            email: email.map(String::from),
            embedded: false,
        }
    }

    fn persisted_json(area_id: Uuid, email: &str, written: DateTime<Utc>) -> String {
        let identity = Identity::student(area_id, Email::parse(email).unwrap(), IdentitySource::CustomLogin);
        sonic_rs::to_string(&PersistedSession::new(identity, "tok".into(), written)).unwrap()
    }

    fn live(email: &str) -> LiveSession {
        LiveSession {
            email: Email::parse(email).unwrap(),
            is_admin: false,
            is_owner: true,
        }
    }

    fn resolved(outcome: &ResolveOutcome) -> &Identity {
        match &outcome.resolution {
            Resolution::Resolved { identity, .. } => identity,
            other => panic!("expected an identity, got {:?}", other),
        }
    }

    #[test]
    fn verified_link_lowercases_email_and_wins() {
        let area = Uuid::new_v4();
        let p = params(Some("true"), Some("Foo@Bar.com"));
        let stored = persisted_json(area, "other@example.com", Utc::now());
        let outcome = resolve_identity(
            ResolveInput {
                area_id: area,
                params: &p,
                persisted: Some(&stored),
                live: Some(live("owner@example.com")),
            },
            DAY_MS,
            Utc::now(),
        );

        let identity = resolved(&outcome);
        assert_eq!(identity.email.as_str(), "foo@bar.com");
        assert_eq!(identity.source, IdentitySource::VerifiedLink);
        assert!(matches!(outcome.resolution, Resolution::Resolved { persist: true, .. }));
    }

    #[test]
    fn verified_flag_without_email_falls_through() {
        let area = Uuid::new_v4();
        let p = params(Some("true"), None);
        let outcome = resolve_identity(
            ResolveInput { area_id: area, params: &p, persisted: None, live: None },
            DAY_MS,
            Utc::now(),
        );
        assert!(matches!(outcome.resolution, Resolution::Unauthenticated { .. }));
    }

    #[test]
    fn fresh_persisted_session_is_restored_verbatim() {
        let area = Uuid::new_v4();
        let p = params(None, None);
        let stored = persisted_json(area, "student@example.com", Utc::now() - Duration::hours(1));
        let outcome = resolve_identity(
            ResolveInput {
                area_id: area,
                params: &p,
                persisted: Some(&stored),
                live: Some(live("owner@example.com")),
            },
            DAY_MS,
            Utc::now(),
        );

        assert_eq!(resolved(&outcome).email.as_str(), "student@example.com");
        assert!(matches!(outcome.resolution, Resolution::Resolved { persist: false, .. }));
        assert!(!outcome.clear_persisted);
    }

    #[test]
    fn expired_persisted_session_falls_through_to_live() {
        let area = Uuid::new_v4();
        let p = params(None, None);
        let stored = persisted_json(area, "student@example.com", Utc::now() - Duration::hours(25));
        let outcome = resolve_identity(
            ResolveInput {
                area_id: area,
                params: &p,
                persisted: Some(&stored),
                live: Some(live("Owner@Example.com")),
            },
            DAY_MS,
            Utc::now(),
        );

        let identity = resolved(&outcome);
        assert_eq!(identity.email.as_str(), "owner@example.com");
        assert_eq!(identity.source, IdentitySource::Platform);
        assert!(identity.is_owner);
        assert!(outcome.clear_persisted);
    }

    #[test]
    fn corrupt_persisted_session_is_a_cache_miss() {
        let area = Uuid::new_v4();
        let p = params(None, None);
        let outcome = resolve_identity(
            ResolveInput {
                area_id: area,
                params: &p,
                persisted: Some("{not json"),
                live: None,
            },
            DAY_MS,
            Utc::now(),
        );

        assert!(outcome.clear_persisted);
        assert_eq!(
            outcome.resolution,
            Resolution::Unauthenticated { redirect: Some(login_path(area)) }
        );
    }

    #[test]
    fn session_for_another_area_is_ignored_but_kept() {
        let p = params(None, None);
        let stored = persisted_json(Uuid::new_v4(), "student@example.com", Utc::now());
        let outcome = resolve_identity(
            ResolveInput {
                area_id: Uuid::new_v4(),
                params: &p,
                persisted: Some(&stored),
                live: None,
            },
            DAY_MS,
            Utc::now(),
        );
        assert!(!outcome.clear_persisted);
        assert!(matches!(outcome.resolution, Resolution::Unauthenticated { .. }));
    }

    fn platform_mirror_json(area_id: Uuid, email: &str) -> String {
        let mut identity = Identity::student(area_id, Email::parse(email).unwrap(), IdentitySource::Platform);
        identity.is_owner = true;
        sonic_rs::to_string(&PersistedSession::new(identity, "tok".into(), Utc::now())).unwrap()
    }

    #[test]
    fn platform_mirror_dies_with_the_platform_session() {
        let area = Uuid::new_v4();
        let p = params(None, None);
        let stored = platform_mirror_json(area, "owner@example.com");
        let outcome = resolve_identity(
            ResolveInput { area_id: area, params: &p, persisted: Some(&stored), live: None },
            DAY_MS,
            Utc::now(),
        );

        assert!(outcome.clear_persisted);
        assert_eq!(
            outcome.resolution,
            Resolution::Unauthenticated { redirect: Some(login_path(area)) }
        );
    }

    #[test]
    fn platform_mirror_is_restored_while_the_session_lives() {
        let area = Uuid::new_v4();
        let p = params(None, None);
        let stored = platform_mirror_json(area, "owner@example.com");
        let outcome = resolve_identity(
            ResolveInput {
                area_id: area,
                params: &p,
                persisted: Some(&stored),
                live: Some(live("owner@example.com")),
            },
            DAY_MS,
            Utc::now(),
        );

        assert!(!outcome.clear_persisted);
        assert!(resolved(&outcome).is_owner);
        assert!(matches!(outcome.resolution, Resolution::Resolved { persist: false, .. }));
    }

    #[test]
    fn platform_mirror_of_another_account_is_replaced() {
        let area = Uuid::new_v4();
        let p = params(None, None);
        let stored = platform_mirror_json(area, "owner@example.com");
        let outcome = resolve_identity(
            ResolveInput {
                area_id: area,
                params: &p,
                persisted: Some(&stored),
                live: Some(live("someone.else@example.com")),
            },
            DAY_MS,
            Utc::now(),
        );

        assert!(outcome.clear_persisted);
        assert_eq!(resolved(&outcome).email.as_str(), "someone.else@example.com");
        assert!(matches!(outcome.resolution, Resolution::Resolved { persist: true, .. }));
    }

    #[test]
    fn embedded_callers_get_no_redirect() {
        let p = IdentityParams {
            embedded: true,
            ..Default::default()
        };
        let outcome = resolve_identity(
            ResolveInput { area_id: Uuid::new_v4(), params: &p, persisted: None, live: None },
            DAY_MS,
            Utc::now(),
        );
        assert_eq!(outcome.resolution, Resolution::Unauthenticated { redirect: None });
    }
}
