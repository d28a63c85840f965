//! Application entry point for the `airquality-health` service.
//!
//! Startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `AQ_LOG_LEVEL` (optional) – log directive when `RUST_LOG` is unset (default: `info`)
//! - `FORCE_COLOR` (optional) – `1`/`0` overrides TTY colour detection
//!
//! See [`airquality_health::config::load_from_env`] for the rest.
use std::{env, net::SocketAddr};

use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;

use airquality_health::{config, routes, schema};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database: {}", cfg.masked_db_url());

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .with_context(|| format!("Failed to connect to database '{}'", cfg.masked_db_url()))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.bind_port));

    // Build app from routes gateway (EMBP)
    let state = routes::AppState::new(pool, cfg)?;
    let app: Router = routes::router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Targets that are too chatty at the service's level.
const QUIET_TARGETS: &str = "sqlx::query=warn,hyper=info,reqwest=info";

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `AQ_LOG_LEVEL` is used as the base
/// directive, and an unparsable value falls back to `info`.
fn init_tracing() {
    // ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = env::var("AQ_LOG_LEVEL").unwrap_or_else(|_| "info".into());
        EnvFilter::try_new(format!("{level},{QUIET_TARGETS}"))
            .unwrap_or_else(|_| EnvFilter::new(format!("info,{QUIET_TARGETS}")))
    });

    let ansi = color_override(env::var("FORCE_COLOR").ok().as_deref())
        .unwrap_or_else(|| std::io::stdout().is_terminal());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_line_number(true)
        .compact()
        .init();
}

/// `FORCE_COLOR` value as an explicit on/off, if it is one.
fn color_override(value: Option<&str>) -> Option<bool> {
    match value?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn force_color_values() {
        // ---
        assert_eq!(color_override(Some("YES")), Some(true));
        assert_eq!(color_override(Some("0")), Some(false));
        assert_eq!(color_override(Some("auto")), None);
        assert_eq!(color_override(None), None);
    }
}
