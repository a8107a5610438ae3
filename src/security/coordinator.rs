use super::rate_limiter::{Decision, RateLimiter, Reason};
use crate::config::RateLimitConfig;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset: Duration,
    pub reason: &'static str,
}

/// Wraps the per-key [`RateLimiter`] with allow/deny lists, skip paths and
/// client-key extraction. Evaluation order for a single `check`: disabled →
/// skip-path → allow-list → deny-list → tracker.
pub struct RateLimitCoordinator {
    limiter: Arc<RateLimiter>,
    lists: Mutex<ListState>,
    skip_paths: Vec<String>,
    enabled: bool,
    trust_proxy: bool,
}

struct ListState {
    allow: HashSet<String>,
    deny: HashSet<String>,
}

impl RateLimitCoordinator {
    pub fn new(config: &RateLimitConfig, enabled: bool, trust_proxy: bool) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::new(
                Duration::from_millis(config.window_ms),
                config.max_requests,
                Duration::from_millis(config.block_duration_ms),
            )),
            lists: Mutex::new(ListState {
                allow: HashSet::new(),
                deny: HashSet::new(),
            }),
            skip_paths: config.skip_paths.clone(),
            enabled,
            trust_proxy,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn start_janitor(&self, interval: Duration, shutdown: Arc<Notify>) {
        self.limiter.start_janitor(interval, shutdown);
    }

    /// Derive the client key: forwarded-chain first entry, then a real-ip
    /// header, then the socket peer — all gated on `trust_proxy` since both
    /// headers are client-controlled. `"unknown"` is a valid sentinel.
    pub fn extract_key(
        &self,
        forwarded_for: Option<&str>,
        real_ip: Option<&str>,
        peer_ip: Option<IpAddr>,
    ) -> String {
        if self.trust_proxy {
            if let Some(chain) = forwarded_for {
                if let Some(first) = chain.split(',').next().map(str::trim) {
                    if !first.is_empty() {
                        return first.to_string();
                    }
                }
            }
            if let Some(real_ip) = real_ip.map(str::trim) {
                if !real_ip.is_empty() {
                    return real_ip.to_string();
                }
            }
        }
        peer_ip.map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".to_string())
    }

    pub fn is_skip_path(&self, path: &str) -> bool {
        self.skip_paths.iter().any(|p| path.starts_with(p.as_str()))
    }

    pub async fn check(&self, key: &str, path: &str) -> CheckResult {
        if !self.enabled {
            return CheckResult {
                allowed: true,
                remaining: u32::MAX,
                reset: Duration::ZERO,
                reason: "disabled",
            };
        }

        if self.is_skip_path(path) {
            return CheckResult {
                allowed: true,
                remaining: u32::MAX,
                reset: Duration::ZERO,
                reason: "skipped",
            };
        }

        {
            let lists = self.lists.lock().await;
            if lists.allow.contains(key) {
                return CheckResult {
                    allowed: true,
                    remaining: u32::MAX,
                    reset: Duration::ZERO,
                    reason: "whitelisted",
                };
            }
            if lists.deny.contains(key) {
                return CheckResult {
                    allowed: false,
                    remaining: 0,
                    reset: Duration::ZERO,
                    reason: "blacklisted",
                };
            }
        }

        let decision: Decision = self.limiter.track(key, Instant::now()).await;
        CheckResult {
            allowed: decision.allowed,
            remaining: decision.remaining,
            reset: decision.reset,
            reason: match decision.reason {
                Reason::Allowed => "ok",
                Reason::RateLimitExceeded => "rate_limit_exceeded",
                Reason::Blocked => "blocked",
            },
        }
    }

    /// Adds `key` to the allow-list, removing it from the deny-list if
    /// present — the two sets must always stay disjoint.
    pub async fn allow(&self, key: &str) {
        let mut lists = self.lists.lock().await;
        lists.deny.remove(key);
        lists.allow.insert(key.to_string());
    }

    pub async fn remove_allow(&self, key: &str) {
        let mut lists = self.lists.lock().await;
        lists.allow.remove(key);
    }

    pub async fn deny(&self, key: &str) {
        let mut lists = self.lists.lock().await;
        lists.allow.remove(key);
        lists.deny.insert(key.to_string());
    }

    pub async fn remove_deny(&self, key: &str) {
        let mut lists = self.lists.lock().await;
        lists.deny.remove(key);
    }

    pub async fn allow_list(&self) -> Vec<String> {
        self.lists.lock().await.allow.iter().cloned().collect()
    }

    pub async fn deny_list(&self) -> Vec<String> {
        self.lists.lock().await.deny.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RateLimitConfig {
        RateLimitConfig {
            window_ms: 60_000,
            max_requests: 2,
            block_duration_ms: 60_000,
            cleanup_interval_ms: 60_000,
            skip_paths: vec!["/health".to_string()],
        }
    }

    #[tokio::test]
    async fn skip_path_bypasses_tracker() {
        let c = RateLimitCoordinator::new(&cfg(), true, true);
        for _ in 0..10 {
            assert!(c.check("1.2.3.4", "/health").await.allowed);
        }
    }

    #[tokio::test]
    async fn allow_list_overrides_tracker() {
        let c = RateLimitCoordinator::new(&cfg(), true, true);
        c.allow("1.2.3.4").await;
        for _ in 0..10 {
            assert!(c.check("1.2.3.4", "/x").await.allowed);
        }
    }

    #[tokio::test]
    async fn deny_list_short_circuits_refusal() {
        let c = RateLimitCoordinator::new(&cfg(), true, true);
        c.deny("1.2.3.4").await;
        assert!(!c.check("1.2.3.4", "/x").await.allowed);
    }

    #[tokio::test]
    async fn allow_and_deny_lists_stay_disjoint() {
        let c = RateLimitCoordinator::new(&cfg(), true, true);
        c.deny("1.2.3.4").await;
        c.allow("1.2.3.4").await;
        assert!(c.deny_list().await.is_empty());
        assert_eq!(c.allow_list().await, vec!["1.2.3.4".to_string()]);
    }

    #[tokio::test]
    async fn disabled_mode_always_allows() {
        let c = RateLimitCoordinator::new(&cfg(), false, true);
        for _ in 0..100 {
            assert!(c.check("1.2.3.4", "/x").await.allowed);
        }
    }

    #[test]
    fn extract_key_honors_trust_proxy() {
        let c = RateLimitCoordinator::new(&cfg(), true, false);
        let peer: IpAddr = "9.9.9.9".parse().unwrap();
        assert_eq!(
            c.extract_key(Some("1.1.1.1, 2.2.2.2"), None, Some(peer)),
            "9.9.9.9"
        );

        let c2 = RateLimitCoordinator::new(&cfg(), true, true);
        assert_eq!(
            c2.extract_key(Some("1.1.1.1, 2.2.2.2"), None, Some(peer)),
            "1.1.1.1"
        );
    }

    #[test]
    fn extract_key_falls_back_to_real_ip_header() {
        let c = RateLimitCoordinator::new(&cfg(), true, true);
        let peer: IpAddr = "9.9.9.9".parse().unwrap();
        assert_eq!(c.extract_key(None, Some("3.3.3.3"), Some(peer)), "3.3.3.3");
        assert_eq!(c.extract_key(None, None, Some(peer)), "9.9.9.9");
    }
}
