pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used — the gateway starts with zero configuration for local
    /// development and relies entirely on env vars in production.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: GatewayConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            GatewayConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("loaded gateway configuration");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        use std::env::var;

        if let Ok(v) = var("HOST") {
            self.host = v;
        }
        if let Ok(v) = var("PORT") {
            if let Ok(n) = v.parse() {
                self.port = n;
            }
        }
        if let Ok(v) = var("ADMIN_PORT") {
            if let Ok(n) = v.parse() {
                self.admin_port = n;
            }
        }
        if let Ok(v) = var("SCHEME_HINT") {
            self.scheme_hint = v;
        }
        if let Ok(v) = var("UPSTREAM_HOSTS") {
            self.upstream_hosts = split_csv(&v);
        }
        if let Ok(v) = var("TRUST_PROXY") {
            self.trust_proxy = parse_bool(&v, self.trust_proxy);
        }
        if let Ok(v) = var("STEALTH_MODE") {
            self.stealth_mode = parse_bool(&v, self.stealth_mode);
        }
        if let Ok(v) = var("UPSTREAM_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.upstream_timeout_ms = n;
            }
        }
        if let Ok(v) = var("SHUTDOWN_DRAIN_MS") {
            if let Ok(n) = v.parse() {
                self.shutdown_drain_ms = n;
            }
        }

        // discovery
        if let Ok(v) = var("AUTO_DISCOVER") {
            self.discovery.auto_discover = parse_bool(&v, self.discovery.auto_discover);
        }
        if let Ok(v) = var("AUTO_DISCOVER_INTERVAL") {
            if let Ok(n) = v.parse() {
                self.discovery.interval_ms = n;
            }
        }
        if let Ok(v) = var("DISCOVERY_NETWORK") {
            self.discovery.network = v;
        }
        if let Ok(v) = var("DISCOVERY_SELF_NAME") {
            self.discovery.self_name = v;
        }

        // rate limiting
        if let Ok(v) = var("RATE_LIMIT_WINDOW_MS") {
            if let Ok(n) = v.parse() {
                self.rate_limit.window_ms = n;
            }
        }
        if let Ok(v) = var("RATE_LIMIT_MAX_REQUESTS") {
            if let Ok(n) = v.parse() {
                self.rate_limit.max_requests = n;
            }
        }
        if let Ok(v) = var("RATE_LIMIT_BLOCK_DURATION_MS") {
            if let Ok(n) = v.parse() {
                self.rate_limit.block_duration_ms = n;
            }
        }
        if let Ok(v) = var("RATE_LIMIT_CLEANUP_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                self.rate_limit.cleanup_interval_ms = n;
            }
        }
        if let Ok(v) = var("RATE_LIMIT_SKIP_PATHS") {
            self.rate_limit.skip_paths = split_csv(&v);
        }

        // bot detection
        if let Ok(v) = var("BOT_DETECTION_ENABLED") {
            self.bot_detection.enabled = parse_bool(&v, self.bot_detection.enabled);
        }
        if let Ok(v) = var("BOT_SCORE_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.bot_detection.score_threshold = n;
            }
        }
        if let Ok(v) = var("BOT_ALLOW_GOOD_BOTS") {
            self.bot_detection.allow_good_bots = parse_bool(&v, self.bot_detection.allow_good_bots);
        }

        // ip reputation
        if let Ok(v) = var("IP_REPUTATION_ENABLED") {
            self.ip_reputation.enabled = parse_bool(&v, self.ip_reputation.enabled);
        }
        if let Ok(v) = var("IP_REPUTATION_API_KEY") {
            self.ip_reputation.api_key = v;
        }
        if let Ok(v) = var("IP_REPUTATION_BLOCK_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.ip_reputation.block_threshold = n;
            }
        }
        if let Ok(v) = var("IP_REPUTATION_WARN_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.ip_reputation.warn_threshold = n;
            }
        }
        if let Ok(v) = var("IP_REPUTATION_CHECK_MODE") {
            self.ip_reputation.check_mode = v;
        }
        if let Ok(v) = var("IP_REPUTATION_CACHE_TTL") {
            if let Ok(n) = v.parse() {
                self.ip_reputation.cache_ttl_ms = n;
            }
        }
        if let Ok(v) = var("IP_REPUTATION_DAILY_QUOTA") {
            if let Ok(n) = v.parse() {
                self.ip_reputation.daily_quota = n;
            }
        }
        if let Ok(v) = var("IP_REPUTATION_CACHE_PATH") {
            self.ip_reputation.cache_path = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_requests == 0 {
            anyhow::bail!("rate_limit.max_requests must be >= 1");
        }
        if self.rate_limit.window_ms < 1000 {
            anyhow::bail!("rate_limit.window_ms must be >= 1000");
        }
        if self.discovery.interval_ms < 5000 {
            anyhow::bail!("discovery.interval_ms must be >= 5000");
        }
        if self.ip_reputation.cache_ttl_ms < 60_000 {
            anyhow::bail!("ip_reputation.cache_ttl_ms must be >= 60000");
        }
        Ok(())
    }
}

fn parse_bool(v: &str, default: bool) -> bool {
    match v {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => default,
    }
}

fn split_csv(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
