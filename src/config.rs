use std::env;
use std::net::SocketAddr;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The maximum number of pooled PostgreSQL connections.
    pub db_pool_max_size: usize,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// The duration of a platform session in days.
    pub session_duration_days: i64,
    /// The lifetime of a virtual member session in milliseconds.
    pub member_session_ttl_ms: i64,
    /// The percentage at which a lesson counts as completed.
    pub completion_threshold: u8,
    /// The number of notifications kept per student.
    pub notification_buffer_cap: usize,
    /// Base URL of the payment functions host.
    pub edge_functions_url: String,
    /// Bearer key sent on every function invocation.
    pub edge_functions_key: Zeroizing<String>,
    /// Shared secret expected on payment provider callbacks.
    pub payment_webhook_secret: Zeroizing<String>,
    /// Root directory of the object storage.
    pub storage_dir: String,
    /// Public URL prefix under which stored objects are served.
    pub storage_public_url: String,
}

/// Reads an optional variable and parses it, falling back to `default`.
fn parse_or<T: std::str::FromStr>(name: &str, default: &str) -> Result<T> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid {}", name))
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let completion_threshold: u8 = parse_or("PROGRESS_COMPLETION_THRESHOLD", "95")?;
        if !(1..=100).contains(&completion_threshold) {
            anyhow::bail!("PROGRESS_COMPLETION_THRESHOLD must be between 1 and 100");
        }

        let member_session_ttl_ms: i64 = parse_or("MEMBER_SESSION_TTL_MS", "86400000")?;
        if member_session_ttl_ms <= 0 {
            anyhow::bail!("MEMBER_SESSION_TTL_MS must be positive");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            db_pool_max_size: parse_or("DB_POOL_MAX_SIZE", "32")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            bind_addr: parse_or("BIND_ADDR", "127.0.0.1:3000")?,
            session_duration_days: parse_or("SESSION_DURATION_DAYS", "7")?,
            member_session_ttl_ms,
            completion_threshold,
            notification_buffer_cap: parse_or("NOTIFICATION_BUFFER_CAP", "50")?,
            edge_functions_url: env::var("EDGE_FUNCTIONS_URL")
                .context("EDGE_FUNCTIONS_URL must be set")?
                .trim_end_matches('/')
                .to_string(),
            edge_functions_key: Zeroizing::new(
                env::var("EDGE_FUNCTIONS_KEY").context("EDGE_FUNCTIONS_KEY must be set")?,
            ),
            payment_webhook_secret: Zeroizing::new(
                env::var("PAYMENT_WEBHOOK_SECRET")
                    .context("PAYMENT_WEBHOOK_SECRET must be set")?,
            ),
            storage_dir: env::var("STORAGE_DIR").unwrap_or_else(|_| "uploads".to_string()),
            storage_public_url: env::var("STORAGE_PUBLIC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3000/storage".to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}
