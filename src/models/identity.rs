use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A student email, always trimmed and lower-cased.
///
/// Every comparison and every storage lookup goes through this type, so two
/// spellings of the same address can never resolve to different rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    /// Normalizes `raw`. Returns `None` when nothing is left after trimming
    /// or the value has no `@`.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() || !normalized.contains('@') {
            return None;
        }
        Some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Email {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Email::parse(&raw).ok_or_else(|| serde::de::Error::custom("invalid email"))
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cohort membership of the acting student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CohortMembership {
    /// The student belongs to no cohort.
    Unassigned,
    /// The student belongs to this cohort.
    Assigned(Uuid),
    /// The roster lookup failed; membership is not known.
    Unknown,
}

impl CohortMembership {
    pub fn from_option(cohort_id: Option<Uuid>) -> Self {
        match cohort_id {
            Some(id) => CohortMembership::Assigned(id),
            None => CohortMembership::Unassigned,
        }
    }
}

/// Where an identity was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// `?verified=true&email=...` magic link.
    VerifiedLink,
    /// Email/password login against the area roster.
    CustomLogin,
    /// A platform account session.
    Platform,
}

/// The acting student inside one member area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub area_id: Uuid,
    pub email: Email,
    pub cohort: CohortMembership,
    pub is_admin: bool,
    pub is_owner: bool,
    pub source: IdentitySource,
}

impl Identity {
    /// A virtual identity for a plain student, before roster enrichment.
    pub fn student(area_id: Uuid, email: Email, source: IdentitySource) -> Self {
        Self {
            area_id,
            email,
            cohort: CohortMembership::Unassigned,
            is_admin: false,
            is_owner: false,
            source,
        }
    }

    /// Admins and area owners bypass every gate.
    pub fn is_privileged(&self) -> bool {
        self.is_admin || self.is_owner
    }
}

/// The persisted session object, `{ user, session, timestamp }`.
///
/// `timestamp` is the write time in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub user: Identity,
    pub session: VirtualSession,
    pub timestamp: i64,
}

/// The session half of a persisted session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualSession {
    pub token: String,
    pub source: IdentitySource,
}

impl PersistedSession {
    pub fn new(identity: Identity, token: String, now: DateTime<Utc>) -> Self {
        let source = identity.source;
        Self {
            user: identity,
            session: VirtualSession { token, source },
            timestamp: now.timestamp_millis(),
        }
    }

    /// Converts the wire shape into a typed cache entry expiring `ttl_ms`
    /// after it was written. `None` when the timestamp is out of range.
    pub fn into_entry(self, ttl_ms: i64) -> Option<SessionCacheEntry> {
        let written = Utc.timestamp_millis_opt(self.timestamp).single()?;
        Some(SessionCacheEntry {
            identity: self.user,
            expires_at: written + Duration::milliseconds(ttl_ms),
        })
    }
}

/// A restored identity together with its expiry.
#[derive(Debug, Clone)]
pub struct SessionCacheEntry {
    pub identity: Identity,
    pub expires_at: DateTime<Utc>,
}

impl SessionCacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_trimmed_and_lowercased() {
        let a = Email::parse("Test@Example.com ").unwrap();
        let b = Email::parse("test@example.com").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "test@example.com");
    }

    #[test]
    fn email_rejects_blank_and_malformed() {
        assert!(Email::parse("   ").is_none());
        assert!(Email::parse("not-an-email").is_none());
    }

    #[test]
    fn cache_entry_expires_after_ttl() {
        let now = Utc::now();
        let identity = Identity::student(
            Uuid::new_v4(),
            Email::parse("a@b.com").unwrap(),
            IdentitySource::CustomLogin,
        );
        let day_ms = 86_400_000;

        let fresh = PersistedSession::new(identity.clone(), "t".into(), now - Duration::hours(23))
            .into_entry(day_ms)
            .unwrap();
        assert!(!fresh.is_expired(now));

        let stale = PersistedSession::new(identity, "t".into(), now - Duration::hours(25))
            .into_entry(day_ms)
            .unwrap();
        assert!(stale.is_expired(now));
    }
}
