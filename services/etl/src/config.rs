//! Runtime settings read from the environment, and cache capacities.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Process-level settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_url: Option<String>,
    pub max_connections: u32,
    pub report_dir: PathBuf,
    pub retry: RetryPolicy,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            db_url: std::env::var("DB_URL").ok(),
            max_connections: env_or("ETL_DB_MAX_CONNECTIONS", 5),
            report_dir: PathBuf::from(
                std::env::var("ETL_REPORT_DIR").unwrap_or_else(|_| "logs".to_string()),
            ),
            retry: RetryPolicy {
                max_attempts: env_or("ETL_RETRY_ATTEMPTS", 3),
                base_delay: Duration::from_millis(env_or("ETL_RETRY_BASE_MS", 500)),
                max_delay: Duration::from_millis(env_or("ETL_RETRY_MAX_MS", 10_000)),
            },
        }
    }

    pub fn require_db_url(&self) -> Result<&str> {
        self.db_url
            .as_deref()
            .ok_or_else(|| Error::Config("DB_URL env var missing".to_string()))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_url: None,
            max_connections: 5,
            report_dir: PathBuf::from("logs"),
            retry: RetryPolicy::default(),
        }
    }
}

/// Capacity of each entity cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub country: usize,
    pub city: usize,
    pub metric: usize,
    pub series: usize,
    pub period: usize,
    pub attribute_type: usize,
    pub attribute_value: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            country: 700,
            city: 5,
            metric: 5,
            series: 30_000,
            period: 30_000,
            attribute_type: 1000,
            attribute_value: 1000,
        }
    }
}
