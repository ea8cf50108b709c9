use std::env;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Behavior when a command fails with a non-retryable business error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    /// Re-queue the item with backoff until retries are exhausted.
    Retry,
    /// Move the item straight to dead_letter.
    Fail,
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub schema_prefix: String,
    pub idempotency_secret: String,
    pub poll_interval: Duration,
    pub max_retries: u32,
    pub base_retry_delay: u64,
    pub max_retry_delay: u64,
    pub processor_name: String,
    pub on_error: OnError,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let idempotency_secret = env::var("IDEMPOTENCY_SECRET")
            .map_err(|_| "IDEMPOTENCY_SECRET must be set".to_string())?;

        let schema_prefix =
            env::var("SCHEMA_PREFIX").unwrap_or_else(|_| "double_entry_ledger".to_string());

        let poll_interval_ms: u64 = env::var("POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .map_err(|_| "POLL_INTERVAL_MS must be a valid u64".to_string())?;

        let max_retries: u32 = env::var("MAX_RETRIES")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| "MAX_RETRIES must be a valid u32".to_string())?;

        let base_retry_delay: u64 = env::var("BASE_RETRY_DELAY")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .map_err(|_| "BASE_RETRY_DELAY must be a valid u64".to_string())?;

        let max_retry_delay: u64 = env::var("MAX_RETRY_DELAY")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .map_err(|_| "MAX_RETRY_DELAY must be a valid u64".to_string())?;

        let processor_name = env::var("PROCESSOR_NAME").unwrap_or_else(|_| "ledger".to_string());

        let on_error = match env::var("ON_ERROR")
            .unwrap_or_else(|_| "fail".to_string())
            .to_lowercase()
            .as_str()
        {
            "retry" => OnError::Retry,
            "fail" => OnError::Fail,
            other => return Err(format!("ON_ERROR must be 'retry' or 'fail', got '{}'", other)),
        };

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8090".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        Ok(Config {
            database_url,
            schema_prefix,
            idempotency_secret,
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_retries,
            base_retry_delay,
            max_retry_delay,
            processor_name,
            on_error,
            host,
            port,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_retry_delay: self.base_retry_delay,
            max_retry_delay: self.max_retry_delay,
        }
    }
}

/// The slice of configuration the monitor, processors, and workers carry.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub on_error: OnError,
    pub processor_name: String,
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            retry: config.retry_policy(),
            on_error: config.on_error,
            processor_name: config.processor_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_options_carry_retry_bounds() {
        let config = Config {
            database_url: "postgres://localhost/ledger".to_string(),
            schema_prefix: "double_entry_ledger".to_string(),
            idempotency_secret: "secret".to_string(),
            poll_interval: Duration::from_millis(250),
            max_retries: 3,
            base_retry_delay: 2,
            max_retry_delay: 60,
            processor_name: "ledger".to_string(),
            on_error: OnError::Fail,
            host: "0.0.0.0".to_string(),
            port: 8090,
        };

        let opts = EngineOptions::from(&config);
        assert_eq!(opts.retry.max_retries, 3);
        assert_eq!(opts.retry.base_retry_delay, 2);
        assert_eq!(opts.poll_interval, Duration::from_millis(250));
        assert_eq!(opts.on_error, OnError::Fail);
    }
}
