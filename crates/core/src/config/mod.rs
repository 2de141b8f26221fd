//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (WAYSTATION_*)
//! 2. TOML config file (if WAYSTATION_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (WAYSTATION_*)
/// 2. TOML config file (if WAYSTATION_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database holding partitions and queues.
    ///
    /// Set via WAYSTATION_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Namespace prefix of every cache partition this engine owns.
    ///
    /// Set via WAYSTATION_CACHE_PREFIX environment variable.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Current cache version. Partitions of any other version are deleted on activation.
    ///
    /// Set via WAYSTATION_CACHE_VERSION environment variable.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Origin that relative request and manifest URLs resolve against.
    ///
    /// Set via WAYSTATION_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Resources fetched into the static partition on install.
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// Document served to failed navigations when nothing else is cached.
    ///
    /// Set via WAYSTATION_OFFLINE_PAGE environment variable.
    #[serde(default = "default_offline_page")]
    pub offline_page: String,

    /// Maximum age of "api" entries, in seconds. 0 makes every entry stale.
    #[serde(default = "default_api_max_age_secs")]
    pub api_max_age_secs: u64,

    /// Maximum age of "dynamic" entries, in seconds.
    #[serde(default = "default_dynamic_max_age_secs")]
    pub dynamic_max_age_secs: u64,

    /// Regexes routed cache-first into the static partition.
    #[serde(default = "default_static_patterns")]
    pub static_patterns: Vec<String>,

    /// Regexes for critical endpoints routed network-first into the api partition.
    #[serde(default = "default_network_first_patterns")]
    pub network_first_patterns: Vec<String>,

    /// Regexes for content endpoints routed stale-while-revalidate into the api partition.
    #[serde(default = "default_stale_while_revalidate_patterns")]
    pub stale_while_revalidate_patterns: Vec<String>,

    /// User-Agent string for outbound requests.
    ///
    /// Set via WAYSTATION_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via WAYSTATION_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delivery endpoint per sync tag. Queued payloads are POSTed here.
    #[serde(default = "default_sync_endpoints")]
    pub sync_endpoints: BTreeMap<String, String>,

    /// Attempts after which a failing queue item is dead-lettered.
    ///
    /// Unset means items are retried forever and a failing item blocks its tag.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Interval of the scheduled "cache-cleanup" trigger in seconds. 0 disables it.
    ///
    /// Set via WAYSTATION_PRUNE_INTERVAL_SECS environment variable.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,

    /// URLs re-fetched into their classified partition per periodic tag.
    #[serde(default)]
    pub periodic_refresh: BTreeMap<String, Vec<String>>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./waystation.sqlite")
}

fn default_cache_prefix() -> String {
    "waystation".into()
}

fn default_cache_version() -> String {
    "v1".into()
}

fn default_origin() -> String {
    "http://localhost:8080".into()
}

fn default_precache() -> Vec<String> {
    vec!["/".into(), "/offline.html".into(), "/manifest.json".into()]
}

fn default_offline_page() -> String {
    "/offline.html".into()
}

fn default_api_max_age_secs() -> u64 {
    300
}

fn default_dynamic_max_age_secs() -> u64 {
    86_400
}

fn default_static_patterns() -> Vec<String> {
    vec![
        r"\.(?:js|mjs|css|png|jpe?g|gif|svg|ico|webp|avif|woff2?|ttf|otf|eot)(?:\?.*)?$".into(),
        r"^/(?:static|assets|_next/static|icons|fonts|images)/".into(),
        r"^/manifest\.json$".into(),
    ]
}

fn default_network_first_patterns() -> Vec<String> {
    vec![r"^/api/(?:auth|user/profile|profile|health|config)(?:/|\?|$)".into()]
}

fn default_stale_while_revalidate_patterns() -> Vec<String> {
    vec![r"^/api/(?:news|weather|content|articles|posts|feed)(?:/|\?|$)".into()]
}

fn default_user_agent() -> String {
    "waystation/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_sync_endpoints() -> BTreeMap<String, String> {
    [
        ("user-data", "/api/user/sync"),
        ("form-submission", "/api/forms"),
        ("offline-actions", "/api/actions"),
        ("analytics-batch", "/api/analytics/batch"),
    ]
    .into_iter()
    .map(|(tag, path)| (tag.to_string(), path.to_string()))
    .collect()
}

fn default_prune_interval_secs() -> u64 {
    3_600
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            cache_prefix: default_cache_prefix(),
            cache_version: default_cache_version(),
            origin: default_origin(),
            precache: default_precache(),
            offline_page: default_offline_page(),
            api_max_age_secs: default_api_max_age_secs(),
            dynamic_max_age_secs: default_dynamic_max_age_secs(),
            static_patterns: default_static_patterns(),
            network_first_patterns: default_network_first_patterns(),
            stale_while_revalidate_patterns: default_stale_while_revalidate_patterns(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            sync_endpoints: default_sync_endpoints(),
            max_attempts: None,
            prune_interval_secs: default_prune_interval_secs(),
            periodic_refresh: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Interval of the scheduled prune, if enabled.
    pub fn prune_interval(&self) -> Option<Duration> {
        (self.prune_interval_secs > 0).then(|| Duration::from_secs(self.prune_interval_secs))
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `WAYSTATION_`
    /// 2. TOML file from `WAYSTATION_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("WAYSTATION_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("WAYSTATION_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
