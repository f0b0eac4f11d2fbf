//! Configuration management for NewsForge services
//!
//! Supports loading configuration from:
//! - Configuration files (config/default.toml, config/{env}.toml)
//! - Environment variables (prefixed with APP__)
//! - The enumerated deployment variables (STORE_URI, CACHE_URL_N,
//!   AI_KEY_N, PUBLISHER_*, ...), which cannot be expressed through a
//!   static prefix map because they are indexed

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Document store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Cache shard pool configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// AI provider configuration
    #[serde(default)]
    pub ai: AiConfig,

    /// Publisher upstream configuration
    #[serde(default)]
    pub publishers: PublisherConfig,

    /// Section rotation scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Enrichment queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Document store connection string; empty means in-memory only
    #[serde(default)]
    pub uri: String,

    /// Serverless-friendly pool: a single shared connection
    #[serde(default = "default_store_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_store_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-operation acquire deadline
    #[serde(default = "default_store_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Reconnect attempts before degrading to the in-memory stub
    #[serde(default = "default_store_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheShardConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Remote shard endpoints; empty plus `disabled` falls back to the
    /// in-process map
    #[serde(default)]
    pub shards: Vec<CacheShardConfig>,

    /// Skip remote shards entirely (CACHE_DISABLED=true)
    #[serde(default)]
    pub disabled: bool,

    /// Per-shard daily command quota
    #[serde(default = "default_shard_daily_quota")]
    pub shard_daily_quota: u64,

    /// Per-command deadline
    #[serde(default = "default_cache_timeout")]
    pub command_timeout_secs: u64,

    /// Health re-ping period
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    /// FIFO list cap per section (MAX_SECTION_CACHE)
    #[serde(default = "default_max_section_cache")]
    pub max_section_cache: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AiConfig {
    /// AI credentials in priority order (AI_KEY, AI_KEY_2, ...)
    #[serde(default)]
    pub keys: Vec<String>,

    /// Provider: http or mock
    #[serde(default = "default_ai_provider")]
    pub provider: String,

    #[serde(default = "default_ai_base_url")]
    pub base_url: String,

    #[serde(default = "default_ai_model")]
    pub model: String,

    #[serde(default = "default_ai_temperature")]
    pub temperature: f32,

    #[serde(default = "default_ai_max_tokens")]
    pub max_tokens: u32,

    /// Daily token quota per credential
    #[serde(default = "default_ai_daily_limit")]
    pub daily_token_limit: u64,

    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublisherConfig {
    /// Publisher A (top-stories API) credentials
    #[serde(default)]
    pub a_keys: Vec<String>,

    #[serde(default = "default_publisher_a_base_url")]
    pub a_base_url: String,

    /// Daily request quota per publisher A credential
    #[serde(default = "default_publisher_a_daily_limit")]
    pub a_daily_limit: u64,

    /// Publisher B (headline-feed API) credentials
    #[serde(default)]
    pub b_keys: Vec<String>,

    #[serde(default = "default_publisher_b_base_url")]
    pub b_base_url: String,

    #[serde(default = "default_publisher_b_daily_limit")]
    pub b_daily_limit: u64,

    #[serde(default = "default_publisher_timeout")]
    pub timeout_secs: u64,

    /// Courtesy pause between items within a batch
    #[serde(default = "default_item_pacing")]
    pub item_pacing_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// ROTATION_PERIOD_SEC
    #[serde(default = "default_rotation_period")]
    pub rotation_period_secs: u64,

    /// Articles processed per section per tick
    #[serde(default = "default_max_per_tick")]
    pub max_per_tick: usize,

    /// Run one serial sweep of all sections before periodic rotation
    #[serde(default = "default_backfill_on_boot")]
    pub backfill_on_boot: bool,

    /// SECTION_THRESHOLD: minimum enriched articles per section before
    /// the cache admission gate opens
    #[serde(default = "default_section_threshold")]
    pub section_threshold: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Job starts admitted per window
    #[serde(default = "default_queue_rate_limit")]
    pub starts_per_window: u32,

    #[serde(default = "default_queue_window")]
    pub window_secs: u64,

    /// Concurrent workers
    #[serde(default = "default_queue_concurrency")]
    pub concurrency: usize,

    /// Idle pause when the queue is empty
    #[serde(default = "default_drain_delay")]
    pub drain_delay_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Exponential backoff base (5 -> 10 -> 20)
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Stalled-job scan period
    #[serde(default = "default_stalled_interval")]
    pub stalled_interval_secs: u64,

    /// How long an active job may hold its lock
    #[serde(default = "default_lock_secs")]
    pub lock_secs: u64,

    #[serde(default = "default_keep_completed_count")]
    pub keep_completed_count: usize,

    #[serde(default = "default_keep_completed_age")]
    pub keep_completed_age_secs: u64,

    #[serde(default = "default_keep_failed_count")]
    pub keep_failed_count: usize,

    #[serde(default = "default_keep_failed_age")]
    pub keep_failed_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_store_max_connections() -> u32 { 1 }
fn default_store_connect_timeout() -> u64 { 5 }
fn default_store_acquire_timeout() -> u64 { 20 }
fn default_store_reconnect_attempts() -> u32 { 5 }
fn default_shard_daily_quota() -> u64 { 10_000 }
fn default_cache_timeout() -> u64 { 10 }
fn default_health_interval() -> u64 { 300 }
fn default_max_section_cache() -> usize { 20 }
fn default_ai_provider() -> String { "http".to_string() }
fn default_ai_base_url() -> String { "https://api.groq.com/openai/v1".to_string() }
fn default_ai_model() -> String { "llama-3.1-8b-instant".to_string() }
fn default_ai_temperature() -> f32 { 0.5 }
fn default_ai_max_tokens() -> u32 { 600 }
fn default_ai_daily_limit() -> u64 { 500_000 }
fn default_ai_timeout() -> u64 { 30 }
fn default_publisher_a_base_url() -> String { "https://api.nytimes.com/svc/topstories/v2".to_string() }
fn default_publisher_a_daily_limit() -> u64 { 500 }
fn default_publisher_b_base_url() -> String { "https://newsdata.io/api/1".to_string() }
fn default_publisher_b_daily_limit() -> u64 { 200 }
fn default_publisher_timeout() -> u64 { 15 }
fn default_item_pacing() -> u64 { 2 }
fn default_rotation_period() -> u64 { 180 }
fn default_max_per_tick() -> usize { 1 }
fn default_backfill_on_boot() -> bool { true }
fn default_section_threshold() -> u64 { 8 }
fn default_queue_rate_limit() -> u32 { 10 }
fn default_queue_window() -> u64 { 60 }
fn default_queue_concurrency() -> usize { 2 }
fn default_drain_delay() -> u64 { 30 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_base() -> u64 { 5 }
fn default_stalled_interval() -> u64 { 60 }
fn default_lock_secs() -> u64 { 90 }
fn default_keep_completed_count() -> usize { 100 }
fn default_keep_completed_age() -> u64 { 86_400 }
fn default_keep_failed_count() -> usize { 500 }
fn default_keep_failed_age() -> u64 { 604_800 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "newsforge".to_string() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            max_connections: default_store_max_connections(),
            connect_timeout_secs: default_store_connect_timeout(),
            acquire_timeout_secs: default_store_acquire_timeout(),
            reconnect_attempts: default_store_reconnect_attempts(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shards: Vec::new(),
            disabled: false,
            shard_daily_quota: default_shard_daily_quota(),
            command_timeout_secs: default_cache_timeout(),
            health_interval_secs: default_health_interval(),
            max_section_cache: default_max_section_cache(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            provider: default_ai_provider(),
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            temperature: default_ai_temperature(),
            max_tokens: default_ai_max_tokens(),
            daily_token_limit: default_ai_daily_limit(),
            timeout_secs: default_ai_timeout(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            a_keys: Vec::new(),
            a_base_url: default_publisher_a_base_url(),
            a_daily_limit: default_publisher_a_daily_limit(),
            b_keys: Vec::new(),
            b_base_url: default_publisher_b_base_url(),
            b_daily_limit: default_publisher_b_daily_limit(),
            timeout_secs: default_publisher_timeout(),
            item_pacing_secs: default_item_pacing(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rotation_period_secs: default_rotation_period(),
            max_per_tick: default_max_per_tick(),
            backfill_on_boot: default_backfill_on_boot(),
            section_threshold: default_section_threshold(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            starts_per_window: default_queue_rate_limit(),
            window_secs: default_queue_window(),
            concurrency: default_queue_concurrency(),
            drain_delay_secs: default_drain_delay(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            stalled_interval_secs: default_stalled_interval(),
            lock_secs: default_lock_secs(),
            keep_completed_count: default_keep_completed_count(),
            keep_completed_age_secs: default_keep_completed_age(),
            keep_failed_count: default_keep_failed_count(),
            keep_failed_age_secs: default_keep_failed_age(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            ai: AiConfig::default(),
            publishers: PublisherConfig::default(),
            scheduler: SchedulerConfig::default(),
            queue: QueueConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files, the APP__ environment overlay,
    /// and the enumerated deployment variables
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: AppConfig = config.try_deserialize()?;
        cfg.apply_enumerated_from(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    /// Apply the enumerated deployment variables through a lookup
    /// closure; split out so tests can drive it without touching the
    /// process environment
    pub fn apply_enumerated_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(uri) = get("STORE_URI") {
            self.store.uri = uri;
        }

        if get("CACHE_DISABLED").map(|v| v == "true").unwrap_or(false) {
            self.cache.disabled = true;
        }

        let mut shards = Vec::new();
        for i in 1.. {
            match get(&format!("CACHE_URL_{}", i)) {
                Some(url) if !url.is_empty() => shards.push(CacheShardConfig {
                    url,
                    token: get(&format!("CACHE_TOKEN_{}", i)),
                }),
                _ => break,
            }
        }
        if !shards.is_empty() {
            self.cache.shards = shards;
        }

        let mut ai_keys = Vec::new();
        if let Some(k) = get("AI_KEY") {
            if !k.is_empty() {
                ai_keys.push(k);
            }
        }
        for i in 2..=4 {
            if let Some(k) = get(&format!("AI_KEY_{}", i)) {
                if !k.is_empty() {
                    ai_keys.push(k);
                }
            }
        }
        if !ai_keys.is_empty() {
            self.ai.keys = ai_keys;
        }

        if let Some(k) = get("PUBLISHER_A_KEY") {
            if !k.is_empty() {
                self.publishers.a_keys = vec![k];
            }
        }
        let mut b_keys = Vec::new();
        for i in 1..=5 {
            if let Some(k) = get(&format!("PUBLISHER_B_KEY_{}", i)) {
                if !k.is_empty() {
                    b_keys.push(k);
                }
            }
        }
        if !b_keys.is_empty() {
            self.publishers.b_keys = b_keys;
        }

        if let Some(v) = get("ROTATION_PERIOD_SEC").and_then(|v| v.parse().ok()) {
            self.scheduler.rotation_period_secs = v;
        }
        if let Some(v) = get("SECTION_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.scheduler.section_threshold = v;
        }
        if let Some(v) = get("MAX_SECTION_CACHE").and_then(|v| v.parse().ok()) {
            self.cache.max_section_cache = v;
        }
    }

    pub fn rotation_period(&self) -> Duration {
        Duration::from_secs(self.scheduler.rotation_period_secs)
    }

    pub fn item_pacing(&self) -> Duration {
        Duration::from_secs(self.publishers.item_pacing_secs)
    }
}
