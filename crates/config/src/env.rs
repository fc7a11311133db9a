use serde::Deserialize;
use std::env;
use tether_common::error::{TetherError, TetherResult};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub log_level: String,
    pub sweep_interval_secs: u64,
    pub audit_retention_days: i64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> TetherResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            log_level: get_var_or("LOG_LEVEL", "info"),
            sweep_interval_secs: get_var_or("SWEEP_INTERVAL_SECS", "300")
                .parse()
                .map_err(|e| TetherError::Config(format!("invalid SWEEP_INTERVAL_SECS: {e}")))?,
            audit_retention_days: get_var_or("AUDIT_RETENTION_DAYS", "365")
                .parse()
                .map_err(|e| TetherError::Config(format!("invalid AUDIT_RETENTION_DAYS: {e}")))?,
        })
    }
}

fn get_var(key: &str) -> TetherResult<String> {
    env::var(key).map_err(|_| TetherError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}
