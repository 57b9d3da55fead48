use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::pipeline::client::DEFAULT_MAX_CONCURRENT_CALLS;
use crate::pipeline::orchestrator::{OrchestratorConfig, DEFAULT_ENTITY_CONCURRENCY};
use crate::pipeline::retry::RetryPolicy;

/// Run configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_concurrent_calls: usize,
    /// Zero disables pacing
    pub requests_per_minute: u32,
    pub entity_concurrency: usize,
}

impl SyncConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = RetryPolicy::default();

        Ok(Self {
            gemini_api_key: lookup("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?,
            gemini_model: lookup("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            input_dir: lookup("REGISTRY_INPUT_DIR")
                .unwrap_or_else(|| "input".to_string())
                .into(),
            output_dir: lookup("REGISTRY_OUTPUT_DIR")
                .unwrap_or_else(|| "output".to_string())
                .into(),
            max_attempts: parse_or(&lookup, "EXTRACTION_MAX_ATTEMPTS", defaults.max_attempts)?,
            initial_delay: Duration::from_millis(parse_or(
                &lookup,
                "EXTRACTION_INITIAL_DELAY_MS",
                defaults.initial_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(parse_or(
                &lookup,
                "EXTRACTION_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )?),
            max_concurrent_calls: parse_or(
                &lookup,
                "EXTRACTION_MAX_CONCURRENT_CALLS",
                DEFAULT_MAX_CONCURRENT_CALLS,
            )?,
            requests_per_minute: parse_or(&lookup, "EXTRACTION_REQUESTS_PER_MINUTE", 0)?,
            entity_concurrency: parse_or(
                &lookup,
                "SYNC_ENTITY_CONCURRENCY",
                DEFAULT_ENTITY_CONCURRENCY,
            )?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::new(self.input_dir.clone()).with_entity_concurrency(self.entity_concurrency)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}
