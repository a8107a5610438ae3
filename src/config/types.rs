use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    3000
}
fn default_admin_port() -> u16 {
    9091
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_scheme_hint() -> String {
    "http".to_string()
}
fn default_true() -> bool {
    true
}
fn default_discover_interval_ms() -> u64 {
    30_000
}
fn default_discovery_network() -> String {
    "gateway_net".to_string()
}
fn default_discovery_self_name() -> String {
    "gateway".to_string()
}
fn default_rl_window_ms() -> u64 {
    60_000
}
fn default_rl_max_requests() -> u32 {
    100
}
fn default_rl_block_ms() -> u64 {
    300_000
}
fn default_rl_cleanup_ms() -> u64 {
    60_000
}
fn default_rl_skip_paths() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/ready".to_string(),
        "/metrics".to_string(),
    ]
}
fn default_bot_threshold() -> u8 {
    70
}
fn default_reputation_block_threshold() -> u8 {
    80
}
fn default_reputation_warn_threshold() -> u8 {
    50
}
fn default_check_mode() -> String {
    "async".to_string()
}
fn default_cache_ttl_ms() -> u64 {
    3_600_000
}
fn default_daily_quota() -> u32 {
    1000
}
fn default_cache_path() -> String {
    "./data/reputation_cache.json".to_string()
}
fn default_upstream_timeout_ms() -> u64 {
    30_000
}
fn default_shutdown_drain_ms() -> u64 {
    10_000
}

/// Infrastructure configuration loaded once at startup from a file (if
/// present) and then overridden field-by-field from the environment. There
/// is no hot-reload control plane: a changed env var only takes effect on
/// the next process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
    #[serde(default = "default_scheme_hint")]
    pub scheme_hint: String,

    #[serde(default)]
    pub upstream_hosts: Vec<String>,

    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub bot_detection: BotDetectionConfig,
    #[serde(default)]
    pub ip_reputation: ReputationConfig,

    #[serde(default = "default_true")]
    pub trust_proxy: bool,
    #[serde(default = "default_true")]
    pub stealth_mode: bool,
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
    #[serde(default = "default_shutdown_drain_ms")]
    pub shutdown_drain_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_port: default_admin_port(),
            scheme_hint: default_scheme_hint(),
            upstream_hosts: Vec::new(),
            discovery: DiscoveryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            bot_detection: BotDetectionConfig::default(),
            ip_reputation: ReputationConfig::default(),
            trust_proxy: true,
            stealth_mode: true,
            upstream_timeout_ms: default_upstream_timeout_ms(),
            shutdown_drain_ms: default_shutdown_drain_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub auto_discover: bool,
    #[serde(default = "default_discover_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_discovery_network")]
    pub network: String,
    #[serde(default = "default_discovery_self_name")]
    pub self_name: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            auto_discover: true,
            interval_ms: default_discover_interval_ms(),
            network: default_discovery_network(),
            self_name: default_discovery_self_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    #[serde(default = "default_rl_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_rl_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_rl_block_ms")]
    pub block_duration_ms: u64,
    #[serde(default = "default_rl_cleanup_ms")]
    pub cleanup_interval_ms: u64,
    #[serde(default = "default_rl_skip_paths")]
    pub skip_paths: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_rl_window_ms(),
            max_requests: default_rl_max_requests(),
            block_duration_ms: default_rl_block_ms(),
            cleanup_interval_ms: default_rl_cleanup_ms(),
            skip_paths: default_rl_skip_paths(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotDetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bot_threshold")]
    pub score_threshold: u8,
    #[serde(default = "default_true")]
    pub allow_good_bots: bool,
}

impl Default for BotDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            score_threshold: default_bot_threshold(),
            allow_good_bots: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_reputation_block_threshold")]
    pub block_threshold: u8,
    #[serde(default = "default_reputation_warn_threshold")]
    pub warn_threshold: u8,
    #[serde(default = "default_check_mode")]
    pub check_mode: String,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_daily_quota")]
    pub daily_quota: u32,
    #[serde(default = "default_cache_path")]
    pub cache_path: String,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            block_threshold: default_reputation_block_threshold(),
            warn_threshold: default_reputation_warn_threshold(),
            check_mode: default_check_mode(),
            cache_ttl_ms: default_cache_ttl_ms(),
            daily_quota: default_daily_quota(),
            cache_path: default_cache_path(),
        }
    }
}

impl ReputationConfig {
    pub fn check_async(&self) -> bool {
        self.check_mode != "sync"
    }
}
