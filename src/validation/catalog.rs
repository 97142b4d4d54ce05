use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::lesson::{ComplementaryLink, Material};
use crate::models::module::CohortScope;

const MAX_URL_LEN: usize = 2048;

/// Validates an absolute http(s) URL.
pub fn validate_url(field: &str, url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(rest) if !rest.is_empty() && url.len() <= MAX_URL_LEN && !url.chars().any(char::is_whitespace) => Ok(()),
        _ => Err(AppError::Validation(format!("{} must be an http(s) URL", field))),
    }
}

/// Drops blank values so `Some("")` and `None` mean the same.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// A lesson stores at most one playback source.
pub fn validate_playback_sources(
    video_url: Option<&str>,
    embed_url: Option<&str>,
    hls_url: Option<&str>,
) -> Result<()> {
    let sources = [("video_url", video_url), ("embed_url", embed_url), ("hls_url", hls_url)];
    let mut set = 0;
    for (field, url) in sources {
        if let Some(url) = url {
            validate_url(field, url)?;
            set += 1;
        }
    }
    if set > 1 {
        return Err(AppError::Validation(
            "Only one of video_url, embed_url and hls_url may be set".to_string(),
        ));
    }
    Ok(())
}

/// Returns the stored schedule: `scheduled_at` is required when the lesson
/// is scheduled and dropped when it is not.
pub fn validate_schedule(
    is_scheduled: bool,
    scheduled_at: Option<DateTime<Utc>>,
) -> Result<Option<DateTime<Utc>>> {
    match (is_scheduled, scheduled_at) {
        (true, None) => Err(AppError::Validation(
            "scheduled_at is required for scheduled lessons".to_string(),
        )),
        (true, at) => Ok(at),
        (false, _) => Ok(None),
    }
}

/// Paid modules need a positive price and an ISO 4217 currency code.
pub fn validate_price(is_paid: bool, price_cents: Option<i64>, currency: Option<&str>) -> Result<()> {
    if !is_paid {
        return Ok(());
    }
    match price_cents {
        Some(price) if price > 0 => {}
        _ => return Err(AppError::Validation("Paid modules need a positive price".to_string())),
    }
    match currency {
        Some(c) if c.len() == 3 && c.chars().all(|ch| ch.is_ascii_uppercase()) => Ok(()),
        _ => Err(AppError::Validation(
            "Paid modules need a three-letter currency code".to_string(),
        )),
    }
}

pub fn validate_links(links: &[ComplementaryLink]) -> Result<()> {
    for link in links {
        if link.title.trim().is_empty() {
            return Err(AppError::Validation("Link title cannot be empty".to_string()));
        }
        validate_url("link url", &link.url)?;
    }
    Ok(())
}

pub fn validate_materials(materials: &[Material]) -> Result<()> {
    for material in materials {
        if material.name.trim().is_empty() {
            return Err(AppError::Validation("Material name cannot be empty".to_string()));
        }
        if material.size_bytes < 0 {
            return Err(AppError::Validation("Material size cannot be negative".to_string()));
        }
        validate_url("material url", &material.url)?;
    }
    Ok(())
}

/// Lowercase letters, digits and single hyphens, 3 to 64 characters.
pub fn validate_slug(slug: &str) -> Result<()> {
    let valid = (3..=64).contains(&slug.len())
        && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--");
    if !valid {
        return Err(AppError::Validation(
            "Slug must be 3-64 lowercase letters, digits or single hyphens".to_string(),
        ));
    }
    Ok(())
}

/// Cohort IDs named by a set of scopes, deduplicated.
pub fn scoped_cohorts<'a>(scopes: impl IntoIterator<Item = &'a CohortScope>) -> Vec<uuid::Uuid> {
    let mut ids: Vec<uuid::Uuid> = scopes
        .into_iter()
        .filter_map(|scope| match scope {
            CohortScope::Specific(ids) => Some(ids.iter().copied()),
            _ => None,
        })
        .flatten()
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn urls_must_be_absolute_http() {
        assert!(validate_url("video_url", "https://cdn.example.com/a.mp4").is_ok());
        assert!(validate_url("video_url", "ftp://example.com/a.mp4").is_err());
        assert!(validate_url("video_url", "https://").is_err());
        assert!(validate_url("video_url", "https://exa mple.com").is_err());
    }

    #[test]
    fn only_one_playback_source() {
        assert!(validate_playback_sources(Some("https://a.com/v.mp4"), None, None).is_ok());
        assert!(validate_playback_sources(None, None, None).is_ok());
        assert!(
            validate_playback_sources(Some("https://a.com/v.mp4"), None, Some("https://a.com/v.m3u8"))
                .is_err()
        );
    }

    #[test]
    fn schedule_requires_a_date() {
        let at = Utc::now();
        assert!(validate_schedule(true, None).is_err());
        assert_eq!(validate_schedule(true, Some(at)).unwrap(), Some(at));
        assert_eq!(validate_schedule(false, Some(at)).unwrap(), None);
    }

    #[test]
    fn paid_modules_need_price_and_currency() {
        assert!(validate_price(false, None, None).is_ok());
        assert!(validate_price(true, Some(1000), Some("AOA")).is_ok());
        assert!(validate_price(true, Some(0), Some("AOA")).is_err());
        assert!(validate_price(true, Some(1000), Some("aoa")).is_err());
        assert!(validate_price(true, None, Some("EUR")).is_err());
    }

    #[test]
    fn slugs() {
        assert!(validate_slug("my-course-2024").is_ok());
        assert!(validate_slug("My-Course").is_err());
        assert!(validate_slug("a--b").is_err());
        assert!(validate_slug("ab").is_err());
    }

    #[test]
    fn scoped_cohorts_skips_all_and_nobody() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let ids = scoped_cohorts([
            &CohortScope::All,
            &CohortScope::Nobody,
            &CohortScope::Specific([a, b].into_iter().collect()),
            &CohortScope::Specific([a].into_iter().collect()),
        ]);
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn blank_values_collapse_to_none() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(Some(" x ".into())), Some("x".into()));
    }
}
