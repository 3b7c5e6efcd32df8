use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::kernel::browser_pool::BrowserConfig;
use crate::kernel::tasks::{RecyclerConfig, SupervisorConfig};
use crate::kernel::KernelSettings;

const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means tasks live in memory only
    pub database_url: Option<String>,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub task_timeout: Duration,
    pub recycle_interval: Duration,
    pub max_concurrent_tasks: usize,
    pub fetch_timeout: Duration,
    pub browser_binary: String,
    pub max_browsers: usize,
    pub browser_page_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url: var("DATABASE_URL"),
            port: parse_or(&var, "PORT", 8000)?,
            allowed_origins: var("ALLOWED_ORIGINS")
                .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            task_timeout: Duration::from_secs(parse_or(&var, "TASK_TIMEOUT_SECS", 1800)?),
            recycle_interval: Duration::from_secs(positive_or(
                &var,
                "RECYCLE_INTERVAL_SECS",
                60,
            )?),
            max_concurrent_tasks: parse_or(&var, "MAX_CONCURRENT_TASKS", 16)?,
            fetch_timeout: Duration::from_secs(parse_or(&var, "FETCH_TIMEOUT_SECS", 30)?),
            browser_binary: var("BROWSER_BINARY").unwrap_or_else(|| "chromium".to_string()),
            max_browsers: parse_or(&var, "MAX_BROWSERS", 2)?,
            browser_page_timeout: Duration::from_secs(parse_or(
                &var,
                "BROWSER_PAGE_TIMEOUT_SECS",
                45,
            )?),
        })
    }

    /// Convenience for tests: configuration from a fixed map.
    pub fn from_map(vars: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    pub fn kernel_settings(&self) -> KernelSettings {
        KernelSettings {
            supervisor: SupervisorConfig {
                max_concurrent: self.max_concurrent_tasks.max(1),
                ..SupervisorConfig::default()
            },
            recycler: RecyclerConfig {
                interval: self.recycle_interval,
                timeout: self.task_timeout,
            },
        }
    }

    pub fn browser_config(&self) -> BrowserConfig {
        BrowserConfig {
            binary: self.browser_binary.clone(),
            max_browsers: self.max_browsers.max(1),
            page_timeout: self.browser_page_timeout,
            ..BrowserConfig::default()
        }
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number, got {raw:?}")),
        None => Ok(default),
    }
}

fn positive_or(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    let value = parse_or(var, key, default)?;
    if value == 0 {
        anyhow::bail!("{key} must be greater than zero");
    }
    Ok(value)
}
