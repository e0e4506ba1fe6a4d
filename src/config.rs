//! Service configuration
//!
//! Loaded once at startup: an optional TOML file (`EXEC_CONFIG`), then
//! environment variable overrides, then validation. The resulting value is
//! passed explicitly to whatever needs it.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

use crate::result::ExecutionMode;

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Which backend runs submissions
    pub mode: ExecutionMode,
    /// Upper bound on concurrently running executions
    pub max_concurrent: usize,
    /// Address the HTTP surface listens on
    pub bind_addr: String,
    pub remote: RemoteConfig,
    pub local: LocalConfig,
}

/// Remote judge endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Sent as `X-RapidAPI-Key` when present
    pub api_key: Option<String>,
    /// Timeout for a single HTTP round-trip in milliseconds
    pub request_timeout_ms: u64,
}

/// Local executor settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Parent directory for per-run scratch directories
    pub temp_root: PathBuf,
    /// Compile step bound in milliseconds
    pub compile_timeout_ms: u64,
    /// Replaces the per-language run timeout when set
    pub run_timeout_ms: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Local,
            max_concurrent: 5,
            bind_addr: "0.0.0.0:3001".to_string(),
            remote: RemoteConfig::default(),
            local: LocalConfig::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:2358".to_string(),
            api_key: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir().join("exec-service"),
            compile_timeout_ms: 30_000,
            run_timeout_ms: None,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `EXEC_CONFIG` (if set) and the environment
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("EXEC_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file {}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(mode) = env_parse::<ExecutionMode>("EXECUTION_MODE")? {
            self.mode = mode;
        }
        if let Some(n) = env_parse("MAX_CONCURRENT_EXECUTIONS")? {
            self.max_concurrent = n;
        }
        if let Ok(addr) = std::env::var("BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("JUDGE0_API_URL") {
            self.remote.base_url = url;
        }
        if let Ok(key) = std::env::var("JUDGE0_API_KEY") {
            self.remote.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(ms) = env_parse("JUDGE0_REQUEST_TIMEOUT_MS")? {
            self.remote.request_timeout_ms = ms;
        }
        if let Ok(root) = std::env::var("EXEC_TEMP_ROOT") {
            self.local.temp_root = PathBuf::from(root);
        }
        if let Some(ms) = env_parse("LOCAL_TIMEOUT_MS")? {
            self.local.run_timeout_ms = Some(ms);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be at least 1");
        }
        if self.mode == ExecutionMode::Remote && self.remote.base_url.trim().is_empty() {
            anyhow::bail!("remote mode requires a judge base URL");
        }
        if self.remote.request_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms must be positive");
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}={}: {}", key, raw, e)),
        Err(_) => Ok(None),
    }
}
