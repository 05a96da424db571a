use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::aggregator::DedupPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database holding the contact directory
    pub database_url: String,

    /// JSON export used to seed message history at startup
    pub sms_export_path: Option<PathBuf>,

    pub http_port: u16,

    pub dedup: DedupPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "hangouts.db".to_string()),

            sms_export_path: std::env::var("SMS_EXPORT_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),

            http_port: std::env::var("HTTP_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("HTTP_PORT must be a valid port number")?,

            dedup: match std::env::var("DEDUP_WINDOW_MS") {
                Ok(ms) => DedupPolicy::Window(
                    ms.trim()
                        .parse()
                        .context("DEDUP_WINDOW_MS must be a number of milliseconds")?,
                ),
                Err(_) => DedupPolicy::Off,
            },
        })
    }
}
