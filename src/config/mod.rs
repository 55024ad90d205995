//! Configuration module for the pet-care backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;

use crate::batch::DEFAULT_WRITE_LIMIT;
use crate::errors::AppError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite document store file
    pub db_path: PathBuf,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Maximum writes a single cascade may commit
    pub batch_write_limit: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let db_path = env::var("PETCARE_DB_PATH")
            .unwrap_or_else(|_| "./data/petcare.sqlite".to_string())
            .into();

        let log_level = env::var("PETCARE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let batch_write_limit = parse_write_limit(env::var("PETCARE_BATCH_WRITE_LIMIT").ok())?;

        Ok(Self {
            db_path,
            log_level,
            batch_write_limit,
        })
    }
}

fn parse_write_limit(raw: Option<String>) -> Result<usize, AppError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_WRITE_LIMIT);
    };
    match raw.trim().parse::<usize>() {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(AppError::Config(format!(
            "PETCARE_BATCH_WRITE_LIMIT must be a positive integer, got {raw:?}"
        ))),
    }
}
