//! Configuration loader for the `airquality-health` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Nothing else in the crate reads `env::var` for
//! service settings.
//!
use std::env;

use anyhow::{anyhow, Result};

/// Parse an optional environment variable of type `$ty` with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Read an optional string environment variable; empty counts as unset.
macro_rules! optional_env {
    ($var_name:expr) => {
        env::var($var_name).ok().filter(|v| !v.trim().is_empty())
    };
}

pub const DEFAULT_OPENAQ_API_URL: &str = "https://api.openaq.org/v2";

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// OpenAQ v2 API base URL.
    pub openaq_api_url: String,

    /// Optional OpenAQ API key, sent as `X-API-Key`.
    pub openaq_api_key: Option<String>,

    /// Days of history fetched for forecasting and reports.
    pub history_days: u32,

    /// Timeout for each outbound HTTP request.
    pub http_timeout_secs: u32,

    /// AQI used when a reading carries no supported pollutant.
    pub default_aqi: f64,

    /// Port the HTTP server binds on all interfaces.
    pub bind_port: u16,

    /// Maximum age of cached series; 0 keeps entries until invalidated.
    pub cache_ttl_secs: u64,

    /// Maximum number of cached series.
    pub cache_max_entries: usize,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `OPENAQ_API_URL` – OpenAQ base URL (default: `https://api.openaq.org/v2`)
/// - `OPENAQ_API_KEY` – OpenAQ API key (default: none)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `HISTORY_DAYS` – days of history to fetch (default: 30)
/// - `HTTP_TIMEOUT_SECS` – outbound request timeout (default: 10)
/// - `DEFAULT_AQI` – AQI when no pollutant is available (default: 100)
/// - `BIND_PORT` – HTTP port (default: 8080)
/// - `CACHE_TTL_SECS` – series cache max age (default: 900)
/// - `CACHE_MAX_ENTRIES` – series cache size limit (default: 64)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let openaq_api_url =
        optional_env!("OPENAQ_API_URL").unwrap_or_else(|| DEFAULT_OPENAQ_API_URL.to_string());
    let openaq_api_key = optional_env!("OPENAQ_API_KEY");
    let db_pool_max = parse_env!("DB_POOL_MAX", u32, 5);
    let history_days = parse_env!("HISTORY_DAYS", u32, 30);
    let http_timeout_secs = parse_env!("HTTP_TIMEOUT_SECS", u32, 10);
    let default_aqi = parse_env!("DEFAULT_AQI", f64, crate::aqi::DEFAULT_AQI);
    let bind_port = parse_env!("BIND_PORT", u16, 8080);
    let cache_ttl_secs = parse_env!("CACHE_TTL_SECS", u64, 900);
    let cache_max_entries = parse_env!("CACHE_MAX_ENTRIES", usize, 64);

    if history_days == 0 {
        return Err(anyhow!("HISTORY_DAYS must be at least 1"));
    }
    if !(default_aqi.is_finite() && default_aqi >= 0.0) {
        return Err(anyhow!("DEFAULT_AQI must be a non-negative number"));
    }

    Ok(Config {
        db_url,
        db_pool_max,
        openaq_api_url,
        openaq_api_key,
        history_days,
        http_timeout_secs,
        default_aqi,
        bind_port,
        cache_ttl_secs,
        cache_max_entries,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the database password and the API key while showing all
    /// other configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL      : {}", self.masked_db_url());
        tracing::info!("  OPENAQ_API_URL    : {}", self.openaq_api_url);
        tracing::info!(
            "  OPENAQ_API_KEY    : {}",
            if self.openaq_api_key.is_some() { "****" } else { "(none)" }
        );
        tracing::info!("  DB_POOL_MAX       : {}", self.db_pool_max);
        tracing::info!("  HISTORY_DAYS      : {}", self.history_days);
        tracing::info!("  HTTP_TIMEOUT_SECS : {}", self.http_timeout_secs);
        tracing::info!("  DEFAULT_AQI       : {}", self.default_aqi);
        tracing::info!("  BIND_PORT         : {}", self.bind_port);
        tracing::info!("  CACHE_TTL_SECS    : {}", self.cache_ttl_secs);
        tracing::info!("  CACHE_MAX_ENTRIES : {}", self.cache_max_entries);
    }

    /// Database URL with the password replaced by `****`.
    pub fn masked_db_url(&self) -> String {
        // ---
        if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                // `postgres://host` has its scheme colon before `//`, not a password
                if !self.db_url[colon_pos..].starts_with("://") {
                    return format!(
                        "{}:****{}",
                        &self.db_url[..colon_pos],
                        &self.db_url[at_pos..]
                    );
                }
            }
        }
        self.db_url.clone()
    }
}
