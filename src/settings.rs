use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
}

fn default_database_url() -> String {
    "sqlite://analytics.db?mode=rwc".to_string()
}
fn default_max_connections() -> u32 {
    5
}
fn default_connect_attempts() -> u32 {
    5
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_attempts: default_connect_attempts(),
        }
    }
}

/// Budget and transport settings for one upstream provider.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Requests allowed within `window_ms`.
    pub rate_limit: u32,
    pub window_ms: u64,
    /// Extra wait added after the oldest request leaves the window.
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_buffer_ms() -> u64 {
    100
}
fn default_timeout_seconds() -> u64 {
    15
}

fn default_geckoterminal() -> ProviderConfig {
    // Public tier: 30 calls/minute
    ProviderConfig {
        base_url: "https://api.geckoterminal.com/api/v2".to_string(),
        rate_limit: 30,
        window_ms: 60_000,
        buffer_ms: default_buffer_ms(),
        timeout_seconds: default_timeout_seconds(),
    }
}

fn default_defillama() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://yields.llama.fi".to_string(),
        rate_limit: 10,
        window_ms: 60_000,
        buffer_ms: default_buffer_ms(),
        timeout_seconds: 30,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Providers {
    #[serde(default = "default_geckoterminal")]
    pub geckoterminal: ProviderConfig,
    #[serde(default = "default_defillama")]
    pub defillama: ProviderConfig,
}

impl Default for Providers {
    fn default() -> Self {
        Self {
            geckoterminal: default_geckoterminal(),
            defillama: default_defillama(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Performance {
    /// Requests per second across all providers, applied before each
    /// provider's sliding window check. Zero disables it.
    #[serde(default = "default_global_qps_limit")]
    pub global_qps_limit: u32,
}

fn default_global_qps_limit() -> u32 {
    2
}

impl Default for Performance {
    fn default() -> Self {
        Self {
            global_qps_limit: default_global_qps_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Backfill {
    #[serde(default = "default_target_days")]
    pub target_days: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Candles requested per page (GeckoTerminal caps at 1000).
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_inter_pool_delay_ms")]
    pub inter_pool_delay_ms: u64,
    /// OHLCV timeframe: "minute", "hour" or "day".
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
}

fn default_target_days() -> i64 {
    30
}
fn default_max_retries() -> usize {
    3
}
fn default_retry_base_ms() -> u64 {
    1_000
}
fn default_page_limit() -> usize {
    1_000
}
fn default_max_pages() -> usize {
    10
}
fn default_inter_pool_delay_ms() -> u64 {
    2_000
}
fn default_timeframe() -> String {
    "hour".to_string()
}

impl Default for Backfill {
    fn default() -> Self {
        Self {
            target_days: default_target_days(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            page_limit: default_page_limit(),
            max_pages: default_max_pages(),
            inter_pool_delay_ms: default_inter_pool_delay_ms(),
            timeframe: default_timeframe(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Scheduler {
    #[serde(default = "default_tier3_cap")]
    pub tier3_cap: usize,
    #[serde(default = "default_analytics_freshness_hours")]
    pub analytics_freshness_hours: i64,
    /// Loop interval for `analytics_collector run --loop`.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Refresh the pool listing before a Tier 3 pass.
    #[serde(default = "default_true")]
    pub discover_before_tier3: bool,
}

fn default_tier3_cap() -> usize {
    50
}
fn default_analytics_freshness_hours() -> i64 {
    24
}
fn default_interval_seconds() -> u64 {
    3_600
}
fn default_true() -> bool {
    true
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            tier3_cap: default_tier3_cap(),
            analytics_freshness_hours: default_analytics_freshness_hours(),
            interval_seconds: default_interval_seconds(),
            discover_before_tier3: default_true(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Analytics {
    #[serde(default = "default_min_history_days")]
    pub min_history_days: i64,
    #[serde(default = "default_concentration_multiplier")]
    pub concentration_multiplier: f64,
    #[serde(default = "default_analytics_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_min_history_days() -> i64 {
    7
}
fn default_concentration_multiplier() -> f64 {
    1.5
}
fn default_analytics_max_concurrency() -> usize {
    4
}

impl Default for Analytics {
    fn default() -> Self {
        Self {
            min_history_days: default_min_history_days(),
            concentration_multiplier: default_concentration_multiplier(),
            max_concurrency: default_analytics_max_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Discovery {
    #[serde(default = "default_min_tvl_usd")]
    pub min_tvl_usd: f64,
    /// Listing chains to keep (case-insensitive). Empty keeps all.
    #[serde(default)]
    pub chains: Vec<String>,
    /// Listing projects to keep (case-insensitive). Empty keeps all.
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default = "default_max_pools")]
    pub max_pools: usize,
}

fn default_min_tvl_usd() -> f64 {
    1_000_000.0
}
fn default_max_pools() -> usize {
    500
}

impl Default for Discovery {
    fn default() -> Self {
        Self {
            min_tvl_usd: default_min_tvl_usd(),
            chains: Vec::new(),
            projects: Vec::new(),
            max_pools: default_max_pools(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataQuality {
    #[serde(default = "default_min_valid_ratio")]
    pub min_valid_ratio: f64,
    #[serde(default = "default_min_positive_ratio")]
    pub min_positive_ratio: f64,
}

fn default_min_valid_ratio() -> f64 {
    0.90
}
fn default_min_positive_ratio() -> f64 {
    0.95
}

impl Default for DataQuality {
    fn default() -> Self {
        Self {
            min_valid_ratio: default_min_valid_ratio(),
            min_positive_ratio: default_min_positive_ratio(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9_100
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub providers: Providers,
    #[serde(default)]
    pub performance: Performance,
    #[serde(default)]
    pub backfill: Backfill,
    #[serde(default)]
    pub scheduler: Scheduler,
    #[serde(default)]
    pub analytics: Analytics,
    #[serde(default)]
    pub discovery: Discovery,
    #[serde(default)]
    pub data_quality: DataQuality,
    #[serde(default)]
    pub metrics: Metrics,
}

impl Settings {
    /// Loads `path` (optional) and `ANALYTICS__*` environment overrides,
    /// e.g. `ANALYTICS__BACKFILL__TARGET_DAYS=60`.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("ANALYTICS").separator("__"))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Conventional single-variable override for the store location
        if let Ok(url) = env::var("DATABASE_URL") {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                settings.database.url = trimmed.to_string();
            }
        }

        if let Ok(raw_chains) = env::var("ANALYTICS_DISCOVERY_CHAINS") {
            if let Some(list) = parse_string_list(&raw_chains) {
                settings.discovery.chains = list;
            }
        }

        Ok(settings)
    }
}

/// Parses either a JSON array or a comma separated list.
fn parse_string_list(raw: &str) -> Option<Vec<String>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(trimmed).ok();
    }
    Some(
        trimmed
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}
