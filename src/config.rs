use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    /// Deadline for the priority fan-out tier, from request start
    #[serde(default = "default_priority_deadline")]
    pub priority_deadline_ms: u64,

    /// Absolute deadline for the whole aggregate operation, from request start
    #[serde(default = "default_overall_deadline")]
    pub overall_deadline_ms: u64,

    /// How many non-priority sources a single fan-out may contact
    #[serde(default = "default_max_secondary")]
    pub max_secondary_sources: usize,

    /// Default result count for list queries
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Cache TTL for search/popular/latest results
    #[serde(default = "default_list_ttl")]
    pub list_cache_ttl_secs: u64,

    /// Cache TTL for tag lists (near-static upstream data)
    #[serde(default = "default_tags_ttl")]
    pub tags_cache_ttl_secs: u64,

    /// Cache TTL for connectivity probe results
    #[serde(default = "default_status_ttl")]
    pub status_cache_ttl_secs: u64,

    /// Timeout for a single connectivity probe
    #[serde(default = "default_probe_timeout")]
    pub connectivity_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,
}

fn default_priority_deadline() -> u64 { 3000 }
fn default_overall_deadline() -> u64 { 5000 }
fn default_max_secondary() -> usize { 3 }
fn default_limit() -> usize { 24 }
fn default_list_ttl() -> u64 { 300 }
fn default_tags_ttl() -> u64 { 3600 }
fn default_status_ttl() -> u64 { 60 }
fn default_probe_timeout() -> u64 { 5 }
fn default_http_timeout() -> u64 { 15 }
fn default_max_retries() -> usize { 3 }
fn default_initial_retry_delay() -> u64 { 500 }
fn default_max_retry_delay() -> u64 { 8000 }

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            priority_deadline_ms: default_priority_deadline(),
            overall_deadline_ms: default_overall_deadline(),
            max_secondary_sources: default_max_secondary(),
            default_limit: default_limit(),
            list_cache_ttl_secs: default_list_ttl(),
            tags_cache_ttl_secs: default_tags_ttl(),
            status_cache_ttl_secs: default_status_ttl(),
            connectivity_timeout_secs: default_probe_timeout(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout_secs: default_http_timeout(),
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let path = Path::new("config.toml");
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                if let Ok(cfg) = toml::from_str::<Config>(&content) {
                    return cfg;
                }
            }
        }
        Self::default()
    }
}

impl HttpConfig {
    /// Build an API client from this configuration
    pub fn create_api_client(&self) -> Result<crate::http_client::ApiClient, reqwest::Error> {
        use crate::http_client::{ApiClient, HttpClientConfig};
        use std::time::Duration;

        let config = HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            initial_retry_delay_ms: self.initial_retry_delay_ms,
            max_retry_delay_ms: self.max_retry_delay_ms,
        };
        ApiClient::with_config(config)
    }
}
