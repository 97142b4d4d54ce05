use std::borrow::Cow;

use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

/// Cookie carrying the platform session id.
pub const SESSION_COOKIE: &str = "session_id";
/// Name prefix of the per-area virtual member session cookies.
pub const MEMBER_SESSION_COOKIE: &str = "member_session";
/// Cookie carrying the CSRF token (readable by scripts).
pub const CSRF_COOKIE: &str = "csrf_token";

/// Name of the member session cookie of one area. Each area keeps its own
/// cookie so sessions in different areas never overwrite each other.
pub fn member_session_cookie(area_id: &Uuid) -> String {
    format!("{}_{}", MEMBER_SESSION_COOKIE, area_id.simple())
}

/// Values of every member session cookie the client sent, with their names.
pub fn member_session_cookies(cookies: &Cookies) -> Vec<(String, String)> {
    let prefix = format!("{}_", MEMBER_SESSION_COOKIE);
    cookies
        .list()
        .into_iter()
        .filter(|c| c.name().starts_with(&prefix))
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect()
}

/// Creates a secure cookie with the given name, value, and max age.
pub fn create_secure_cookie(
    name: impl Into<Cow<'static, str>>,
    value: String,
    max_age_secs: i64,
) -> Cookie<'static> {
    let name = name.into();
    let http_only = name != CSRF_COOKIE;
    let mut cookie = Cookie::new(name, value);

    let is_production = std::env::var("APP_ENV")
        .unwrap_or_else(|_| "development".to_string()) == "production";

    if http_only {
        cookie.set_http_only(true);
    }

    if is_production {
        cookie.set_secure(true);
    }

    cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
    cookie.set_max_age(Duration::seconds(max_age_secs));
    cookie.set_path("/");

    cookie
}

/// An already-expired cookie used to clear `name` on the client.
pub fn expired_cookie(name: impl Into<Cow<'static, str>>) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, "");
    cookie.set_max_age(Duration::seconds(0));
    cookie.set_path("/");
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_cookies_are_scoped_per_area() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(member_session_cookie(&a), member_session_cookie(&b));
        assert!(member_session_cookie(&a).starts_with("member_session_"));

        // Expiring area A's cookie leaves area B's name untouched.
        let expired = expired_cookie(member_session_cookie(&a));
        assert_eq!(expired.name(), member_session_cookie(&a));
        assert_ne!(expired.name(), member_session_cookie(&b));
    }

    #[test]
    fn only_the_csrf_cookie_is_script_readable() {
        let csrf = create_secure_cookie(CSRF_COOKIE, "t".into(), 60);
        assert_ne!(csrf.http_only(), Some(true));

        let member = create_secure_cookie(member_session_cookie(&Uuid::nil()), "t".into(), 60);
        assert_eq!(member.http_only(), Some(true));
        assert_eq!(member.path(), Some("/"));
    }
}
