//! Configuration loading and resolution
//!
//! Bootstrap configuration comes from a TOML file. Every field has a built-in
//! default, so a missing file is a warning rather than a startup failure.
//!
//! # Config File Priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`MACHI_CONFIG`)
//! 3. Per-user config file (`~/.config/machi/<module>.toml`)
//! 4. Built-in defaults
//!
//! Upstream credentials may additionally be supplied through
//! `MACHI_ESTAT_APP_ID` and `MACHI_REINFOLIB_KEY`, which take precedence over
//! the TOML values. Dataset identifiers are never configured here; they are
//! compiled into the catalog.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "MACHI_CONFIG";

/// Environment variable overriding the e-Stat application id
pub const ESTAT_APP_ID_ENV_VAR: &str = "MACHI_ESTAT_APP_ID";

/// Environment variable overriding the real-estate subscription key
pub const REINFOLIB_KEY_ENV_VAR: &str = "MACHI_REINFOLIB_KEY";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub estat: EstatConfig,

    #[serde(default)]
    pub real_estate: RealEstateConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// e-Stat (government statistics portal) API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstatConfig {
    /// Application id issued by e-Stat
    #[serde(default)]
    pub app_id: Option<String>,

    #[serde(default = "default_estat_base_url")]
    pub base_url: String,

    /// Outbound request quota for this credential
    #[serde(default = "default_estat_rps")]
    pub requests_per_second: u32,
}

impl Default for EstatConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            base_url: default_estat_base_url(),
            requests_per_second: default_estat_rps(),
        }
    }
}

/// Real Estate Information Library API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealEstateConfig {
    #[serde(default)]
    pub subscription_key: Option<String>,

    #[serde(default = "default_real_estate_base_url")]
    pub base_url: String,

    #[serde(default = "default_real_estate_rps")]
    pub requests_per_second: u32,

    /// Transaction year queried for price indicators
    #[serde(default = "default_real_estate_year")]
    pub year: u16,
}

impl Default for RealEstateConfig {
    fn default() -> Self {
        Self {
            subscription_key: None,
            base_url: default_real_estate_base_url(),
            requests_per_second: default_real_estate_rps(),
            year: default_real_estate_year(),
        }
    }
}

/// Pipeline fan-out and retry tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum concurrent upstream fetches per report run
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,

    /// Deadline for a single upstream attempt
    #[serde(default = "default_upstream_deadline_ms")]
    pub upstream_deadline_ms: u64,

    /// Attempt ceiling for retryable upstream failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Upper bound on municipalities in one ranking-page run
    #[serde(default = "default_max_ranking_cities")]
    pub max_ranking_cities: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_limit: default_worker_limit(),
            upstream_deadline_ms: default_upstream_deadline_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_ranking_cities: default_max_ranking_cities(),
        }
    }
}

impl PipelineConfig {
    pub fn upstream_deadline(&self) -> Duration {
        Duration::from_millis(self.upstream_deadline_ms)
    }
}

/// Response cache lifetimes per dataset refresh class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_census_ttl_secs")]
    pub census_ttl_secs: u64,

    #[serde(default = "default_annual_ttl_secs")]
    pub annual_ttl_secs: u64,

    #[serde(default = "default_frequent_ttl_secs")]
    pub frequent_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            census_ttl_secs: default_census_ttl_secs(),
            annual_ttl_secs: default_annual_ttl_secs(),
            frequent_ttl_secs: default_frequent_ttl_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5790
}

fn default_estat_base_url() -> String {
    "https://api.e-stat.go.jp/rest/3.0/app/json".to_string()
}

fn default_estat_rps() -> u32 {
    5
}

fn default_real_estate_base_url() -> String {
    "https://www.reinfolib.mlit.go.jp/ex-api/external".to_string()
}

fn default_real_estate_rps() -> u32 {
    2
}

fn default_real_estate_year() -> u16 {
    2024
}

fn default_worker_limit() -> usize {
    4
}

fn default_upstream_deadline_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_max_ranking_cities() -> usize {
    100
}

fn default_census_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_annual_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_frequent_ttl_secs() -> u64 {
    6 * 60 * 60
}

/// Resolve which config file to read
///
/// Returns `None` when neither the CLI nor the environment names a file and no
/// per-user file exists.
pub fn resolve_config_path(cli_arg: Option<&Path>, module_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config file
    let user_config = dirs::config_dir()
        .map(|d| d.join("machi").join(format!("{}.toml", module_name)))?;
    user_config.exists().then_some(user_config)
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Load configuration with graceful degradation
///
/// A missing file yields defaults with a warning. A file that exists but cannot
/// be parsed is an error, since silently ignoring it would hide typos.
pub fn load_config(cli_arg: Option<&Path>, module_name: &str) -> Result<TomlConfig> {
    let mut config = match resolve_config_path(cli_arg, module_name) {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            load_toml_config(&path)?
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            TomlConfig::default()
        }
        None => {
            warn!("No config file found, using built-in defaults");
            TomlConfig::default()
        }
    };

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Apply credential overrides from the environment
pub fn apply_env_overrides(config: &mut TomlConfig) {
    if let Ok(app_id) = std::env::var(ESTAT_APP_ID_ENV_VAR) {
        if is_valid_key(&app_id) {
            info!("e-Stat app id loaded from environment variable");
            config.estat.app_id = Some(app_id);
        }
    }

    if let Ok(key) = std::env::var(REINFOLIB_KEY_ENV_VAR) {
        if is_valid_key(&key) {
            info!("Real-estate subscription key loaded from environment variable");
            config.real_estate.subscription_key = Some(key);
        }
    }
}

/// Reject values that would make the pipeline unusable
pub fn validate(config: &TomlConfig) -> Result<()> {
    if config.pipeline.worker_limit == 0 {
        return Err(Error::Config("pipeline.worker_limit must be at least 1".to_string()));
    }
    if config.pipeline.max_attempts == 0 {
        return Err(Error::Config("pipeline.max_attempts must be at least 1".to_string()));
    }
    if config.estat.requests_per_second == 0 || config.real_estate.requests_per_second == 0 {
        return Err(Error::Config("requests_per_second must be at least 1".to_string()));
    }
    if config.pipeline.max_ranking_cities < 2 {
        return Err(Error::Config("pipeline.max_ranking_cities must be at least 2".to_string()));
    }
    Ok(())
}

/// Validate a credential (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Write config to disk atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.pipeline.worker_limit, 4);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.server.port, 5790);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [pipeline]
            worker_limit = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.worker_limit, 8);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = TomlConfig::default();
        config.pipeline.worker_limit = 0;
        assert!(matches!(validate(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("abc"));
        assert!(!is_valid_key("   "));
        assert!(!is_valid_key(""));
    }
}
