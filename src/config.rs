//! Configuration loader for the SensorThings core service.
//!
//! All runtime configuration values and their defaults are loaded here from
//! environment variables (with optional `.env` file support provided by the
//! caller), so no other module reads `env::var` directly.
//!
use std::env;

use anyhow::{anyhow, Result};

use crate::id_policy::IdGenerationMode;

/// Parse an optional numeric environment variable with a default value.
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

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL/PostGIS connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Listen port of the HTTP shell.
    pub http_port: u16,

    /// Whether caller-supplied ids may be used on insert.
    pub id_generation_mode: IdGenerationMode,

    /// Page size when a query carries no `$top`.
    pub default_top: i64,

    /// Upper clamp for `$top`.
    pub max_top: i64,

    /// Reject every mutation.
    pub read_only: bool,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `HTTP_PORT` – listen port (default: 8080)
/// - `ID_GENERATION_MODE` – `ServerGeneratedOnly` (default) or `ServerAndClientGenerated`
/// - `DEFAULT_TOP` – default page size (default: 100)
/// - `MAX_TOP` – maximum page size (default: 1000)
/// - `READ_ONLY` – `true`/`false` (default: false)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env!("DB_POOL_MAX", u32, 5);
    let http_port = parse_env!("HTTP_PORT", u16, 8080);
    let id_generation_mode = env::var("ID_GENERATION_MODE")
        .ok()
        .map(|v| v.parse::<IdGenerationMode>())
        .transpose()?
        .unwrap_or_default();
    let default_top = parse_env!("DEFAULT_TOP", i64, 100);
    let max_top = parse_env!("MAX_TOP", i64, 1000);
    let read_only = parse_env!("READ_ONLY", bool, false);

    if default_top < 0 || max_top < 0 {
        return Err(anyhow!("DEFAULT_TOP and MAX_TOP must not be negative"));
    }

    Ok(Config {
        db_url,
        db_pool_max,
        http_port,
        id_generation_mode,
        default_top: default_top.min(max_top),
        max_top,
        read_only,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the database password while showing every other value.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL       : {}", mask_password(&self.db_url));
        tracing::info!("  DB_POOL_MAX        : {}", self.db_pool_max);
        tracing::info!("  HTTP_PORT          : {}", self.http_port);
        tracing::info!("  ID_GENERATION_MODE : {:?}", self.id_generation_mode);
        tracing::info!("  DEFAULT_TOP        : {}", self.default_top);
        tracing::info!("  MAX_TOP            : {}", self.max_top);
        tracing::info!("  READ_ONLY          : {}", self.read_only);
    }
}

fn mask_password(db_url: &str) -> String {
    // ---
    let userinfo_start = db_url.find("://").map_or(0, |pos| pos + 3);
    let Some(at_pos) = db_url.rfind('@') else {
        return db_url.to_string();
    };
    if at_pos < userinfo_start {
        return db_url.to_string();
    }
    match db_url[userinfo_start..at_pos].find(':') {
        Some(colon_pos) => {
            let colon_pos = userinfo_start + colon_pos;
            format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..])
        }
        None => db_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn password_is_masked() {
        // ---
        assert_eq!(
            mask_password("postgres://sta:secret@db:5432/sta"),
            "postgres://sta:****@db:5432/sta"
        );
        assert_eq!(
            mask_password("postgres://db:5432/sta"),
            "postgres://db:5432/sta"
        );
    }
}
