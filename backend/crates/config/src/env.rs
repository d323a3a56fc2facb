use ferry_common::error::{FerryError, FerryResult};
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub log_level: String,
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> FerryResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            log_level: get_var_or("LOG_LEVEL", "info"),
            db_max_connections: parse_var_or("DB_MAX_CONNECTIONS", 10)?,
        })
    }
}

pub(crate) fn get_var(key: &str) -> FerryResult<String> {
    env::var(key).map_err(|_| FerryError::Config(format!("{key} is required but not set")))
}

pub(crate) fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse an optional env var, falling back to `default` when unset.
/// A set-but-unparseable value is a configuration error, not a silent default.
pub(crate) fn parse_var_or<T>(key: &str, default: T) -> FerryResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| FerryError::Config(format!("invalid {key}: {e}"))),
        _ => Ok(default),
    }
}
