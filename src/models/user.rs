use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Represents a platform account (seller or admin).
#[derive(Clone, Debug)]
pub struct User {
    /// The unique identifier for the user.
    pub id: Uuid,
    /// The user's full name.
    pub name: String,
    /// The user's username.
    pub username: String,
    /// The user's email address, stored normalized.
    pub email: String,
    /// The user's hashed password.
    pub password: String,
    /// The user's roles.
    pub roles: Vec<String>,
    /// The timestamp when the user was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the user was last updated.
    pub updated_at: DateTime<Utc>,
    /// The timestamp of the user's last password change.
    pub last_password_change: Option<DateTime<Utc>>,
    /// Whether the user is active.
    pub is_active: bool,
}

impl User {
    /// Whether the user carries the platform `admin` role.
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }
}

/// The public view of a platform account. Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_password_change: Option<DateTime<Utc>>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            roles: user.roles.clone(),
            is_admin: user.is_admin(),
            created_at: user.created_at,
            updated_at: user.updated_at,
            last_password_change: user.last_password_change,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(roles: &[&str]) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Ana Seller".into(),
            username: "ana".into(),
            email: "ana@example.com".into(),
            password: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_password_change: None,
            is_active: true,
        }
    }

    #[test]
    fn profile_hides_the_password_hash() {
        let json = sonic_rs::to_string(&UserProfile::from(&user(&["user"]))).unwrap();
        assert!(json.contains(r#""username":"ana""#));
        assert!(!json.contains("argon2"));
        assert!(json.contains(r#""is_admin":false"#));
    }

    #[test]
    fn admin_role_is_reflected() {
        assert!(UserProfile::from(&user(&["user", "admin"])).is_admin);
    }
}
