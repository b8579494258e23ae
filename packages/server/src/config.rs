use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub database_max_connections: u32,
    /// Upper bound on how long a transition waits for the request row lock.
    pub lock_timeout: Duration,
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
            lock_timeout: parse_lock_timeout(
                env::var("WORKFLOW_LOCK_TIMEOUT_MS").ok().as_deref(),
            )?,
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|origins| parse_origins(&origins))
                .unwrap_or_default(),
        })
    }
}

/// Postgres treats a `lock_timeout` of zero as "wait forever", so zero is
/// rejected along with anything that is not a whole number of milliseconds.
fn parse_lock_timeout(raw: Option<&str>) -> Result<Duration> {
    let millis: u64 = raw
        .unwrap_or("5000")
        .trim()
        .parse()
        .context("WORKFLOW_LOCK_TIMEOUT_MS must be a number of milliseconds")?;
    if millis == 0 {
        bail!("WORKFLOW_LOCK_TIMEOUT_MS must be greater than zero");
    }
    Ok(Duration::from_millis(millis))
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect()
}
