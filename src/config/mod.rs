//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Pull-fallback interval for workers. Push wake-ups are a latency
    /// optimization; this bounds how long a missed NOTIFY can strand work.
    pub poll_interval: Duration,
    /// Base URL of the Ollama server used by the shipped generator.
    pub ollama_url: String,
    /// Model used when a caption request carries no hint.
    pub default_caption_model: String,
    /// Model used when an embedding request carries no hint.
    pub default_embedding_model: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let poll_secs: u64 = match std::env::var("POLL_INTERVAL_SECS") {
            Ok(v) => v
                .parse()
                .map_err(|_| Error::Config(format!("POLL_INTERVAL_SECS is not a number: {v}")))?,
            Err(_) => 5,
        };

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            poll_interval: Duration::from_secs(poll_secs),
            ollama_url: std::env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            default_caption_model: std::env::var("DEFAULT_CAPTION_MODEL")
                .unwrap_or_else(|_| "llava:7b".to_string()),
            default_embedding_model: std::env::var("DEFAULT_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "nomic-embed-text".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
