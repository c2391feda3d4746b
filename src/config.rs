//! Application configuration
//!
//! Built-in defaults, overridden by an optional TOML file, overridden by
//! environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::market_data::yahoo::DEFAULT_YAHOO_BASE_URL;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite file shared by the portfolio and research stores
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Timeout for every outbound HTTP request
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_yahoo_base_url")]
    pub yahoo_base_url: String,

    #[serde(default = "default_primo_agent_url")]
    pub primo_agent_url: String,

    #[serde(default = "default_trading_agents_url")]
    pub trading_agents_url: String,

    #[serde(default = "default_max_debate_rounds")]
    pub max_debate_rounds: u32,

    /// Single-agent confidence at which a BUY/SELL raises an alert
    #[serde(default = "default_high_confidence_threshold")]
    pub high_confidence_threshold: f64,

    #[serde(default = "default_job_workers")]
    pub job_workers: usize,

    /// Attempts per queued job, including the first
    #[serde(default = "default_job_max_attempts")]
    pub job_max_attempts: u32,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default = "default_initial_capital")]
    pub default_initial_capital: f64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_db_path() -> String {
    "tradedesk.db".to_string()
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_yahoo_base_url() -> String {
    DEFAULT_YAHOO_BASE_URL.to_string()
}
fn default_primo_agent_url() -> String {
    "http://localhost:8002".to_string()
}
fn default_trading_agents_url() -> String {
    "http://localhost:8001".to_string()
}
fn default_max_debate_rounds() -> u32 {
    2
}
fn default_high_confidence_threshold() -> f64 {
    0.8
}
fn default_job_workers() -> usize {
    2
}
fn default_job_max_attempts() -> u32 {
    1
}
fn default_initial_capital() -> f64 {
    crate::backtest::DEFAULT_INITIAL_CAPITAL
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            http_timeout_secs: default_http_timeout_secs(),
            yahoo_base_url: default_yahoo_base_url(),
            primo_agent_url: default_primo_agent_url(),
            trading_agents_url: default_trading_agents_url(),
            max_debate_rounds: default_max_debate_rounds(),
            high_confidence_threshold: default_high_confidence_threshold(),
            job_workers: default_job_workers(),
            job_max_attempts: default_job_max_attempts(),
            rate_limit: RateLimitSettings::default(),
            default_initial_capital: default_initial_capital(),
        }
    }
}

/// Per-client request budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_burst")]
    pub burst: usize,
}

fn default_max_requests() -> usize {
    120
}
fn default_window_secs() -> u64 {
    60
}
fn default_burst() -> usize {
    20
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            burst: default_burst(),
        }
    }
}

impl AppConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// TOML file named by `TRADEDESK_CONFIG` (default `tradedesk.toml`) if
    /// present, then environment overrides.
    pub fn from_env() -> Result<Self> {
        let path =
            std::env::var("TRADEDESK_CONFIG").unwrap_or_else(|_| "tradedesk.toml".to_string());

        let mut config = if Path::new(&path).exists() {
            Self::load(&path).with_context(|| format!("Invalid config file {}", path))?
        } else {
            tracing::debug!("No config file at {}, using defaults", path);
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TRADEDESK_BIND") {
            self.bind_addr = v;
        }
        if let Some(v) = get("TRADEDESK_DB_PATH") {
            self.db_path = v;
        }
        if let Some(v) = get("YAHOO_BASE_URL") {
            self.yahoo_base_url = v;
        }
        if let Some(v) = get("PRIMO_AGENT_URL") {
            self.primo_agent_url = v;
        }
        if let Some(v) = get("TRADING_AGENTS_URL") {
            self.trading_agents_url = v;
        }

        parse_into(&get, "HTTP_TIMEOUT_SECS", &mut self.http_timeout_secs)?;
        parse_into(&get, "MAX_DEBATE_ROUNDS", &mut self.max_debate_rounds)?;
        parse_into(&get, "HIGH_CONFIDENCE_THRESHOLD", &mut self.high_confidence_threshold)?;
        parse_into(&get, "JOB_WORKERS", &mut self.job_workers)?;
        parse_into(&get, "JOB_MAX_ATTEMPTS", &mut self.job_max_attempts)?;
        parse_into(&get, "RATE_LIMIT_MAX_REQUESTS", &mut self.rate_limit.max_requests)?;
        parse_into(&get, "RATE_LIMIT_WINDOW_SECS", &mut self.rate_limit.window_secs)?;
        parse_into(&get, "RATE_LIMIT_BURST", &mut self.rate_limit.burst)?;
        parse_into(&get, "DEFAULT_INITIAL_CAPITAL", &mut self.default_initial_capital)?;

        Ok(())
    }
}

fn parse_into<T>(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = get(key) {
        *slot = raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid {}: {:?}", key, raw))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let c = AppConfig::default();
        assert_eq!(c.bind_addr, "0.0.0.0:3000");
        assert_eq!(c.primo_agent_url, "http://localhost:8002");
        assert_eq!(c.trading_agents_url, "http://localhost:8001");
        assert_eq!(c.max_debate_rounds, 2);
        assert_eq!(c.rate_limit.max_requests, 120);
        assert_eq!(c.default_initial_capital, 100_000.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c: AppConfig = toml::from_str(
            r#"
            db_path = "/tmp/x.db"
            [rate_limit]
            burst = 5
            "#,
        )
        .unwrap();
        assert_eq!(c.db_path, "/tmp/x.db");
        assert_eq!(c.rate_limit.burst, 5);
        assert_eq!(c.rate_limit.window_secs, 60);
        assert_eq!(c.job_workers, 2);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TRADEDESK_BIND", "127.0.0.1:8080"),
            ("JOB_WORKERS", "4"),
            ("HIGH_CONFIDENCE_THRESHOLD", "0.9"),
            ("PRIMO_AGENT_URL", ""),
        ]
        .into_iter()
        .collect();
        let mut c = AppConfig::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.bind_addr, "127.0.0.1:8080");
        assert_eq!(c.job_workers, 4);
        assert_eq!(c.high_confidence_threshold, 0.9);
        assert_eq!(c.primo_agent_url, "http://localhost:8002");
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut c = AppConfig::default();
        let err = c
            .apply_env(|k| (k == "JOB_WORKERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("JOB_WORKERS"));
    }
}
