use crate::config::ReputationConfig;
use crate::error::GatewayError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

const PROVIDER_CHECK_URL: &str = "https://api.abuseipdb.com/api/v2/check";
const PROVIDER_REPORT_URL: &str = "https://api.abuseipdb.com/api/v2/report";
const MAX_CACHE_ENTRIES: usize = 10_000;
const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Warn,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub score: u8,
    pub total_reports: u32,
    pub categories: Vec<u16>,
    pub country_code: Option<String>,
    pub isp: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Lookup {
    pub record: Option<ReputationRecord>,
    pub verdict: Verdict,
    pub source: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    ip: IpAddr,
    record: ReputationRecord,
    fetched_at_secs: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    entries: Vec<CacheEntry>,
    quota_used: u32,
    quota_day: u64,
}

#[derive(Debug, Deserialize)]
struct AbuseIpDbResponse {
    data: AbuseIpDbData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbuseIpDbData {
    abuse_confidence_score: u8,
    #[serde(default)]
    total_reports: u32,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(default)]
    reports: Vec<AbuseIpDbReport>,
}

#[derive(Debug, Deserialize)]
struct AbuseIpDbReport {
    #[serde(default)]
    categories: Vec<u16>,
}

/// IPv4/IPv6 private, loopback and link-local ranges bypass external lookup
/// entirely — they are never meaningfully scoreable by a public reputation
/// provider.
fn is_private_or_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            let segments = v6.segments();
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// External IP reputation lookups, backed by a TTL cache and a daily quota
/// on outbound provider calls. On any provider failure or quota exhaustion
/// the engine fails open (`Verdict::Allow`) rather than blocking traffic.
pub struct ReputationEngine {
    config: ReputationConfig,
    client: Client,
    cache: Mutex<HashMap<IpAddr, CacheEntry>>,
    allow_list: Mutex<HashSet<IpAddr>>,
    quota_used: AtomicU32,
    quota_day: AtomicU64,
    cache_path: PathBuf,
}

impl ReputationEngine {
    pub fn new(config: ReputationConfig) -> Self {
        let cache_path = PathBuf::from(config.cache_path.clone());
        Self {
            client: Client::new(),
            cache: Mutex::new(HashMap::new()),
            allow_list: Mutex::new(HashSet::new()),
            quota_used: AtomicU32::new(0),
            quota_day: AtomicU64::new(now_epoch_secs() / SECS_PER_DAY),
            cache_path,
            config,
        }
    }

    fn verdict_for(&self, score: u8) -> Verdict {
        if score >= self.config.block_threshold {
            Verdict::Block
        } else if score >= self.config.warn_threshold {
            Verdict::Warn
        } else {
            Verdict::Allow
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.config.cache_ttl_ms)
    }

    /// Load the on-disk cache and quota counters, discarding cache entries
    /// that have already aged out of the TTL window.
    pub async fn load_persisted(&self) {
        let Ok(content) = tokio::fs::read_to_string(&self.cache_path).await else {
            return;
        };
        let Ok(state): Result<PersistedState, _> = serde_json::from_str(&content) else {
            tracing::warn!("discarding unreadable reputation cache at {}", self.cache_path.display());
            return;
        };

        let now = now_epoch_secs();
        let ttl_secs = self.ttl().as_secs();
        let mut cache = self.cache.lock().await;
        for entry in state.entries {
            if now.saturating_sub(entry.fetched_at_secs) < ttl_secs {
                cache.insert(entry.ip, entry);
            }
        }

        let today = now / SECS_PER_DAY;
        if state.quota_day == today {
            self.quota_used.store(state.quota_used, Ordering::Relaxed);
        }
        self.quota_day.store(today, Ordering::Relaxed);
    }

    pub async fn persist(&self) -> Result<(), GatewayError> {
        let entries: Vec<CacheEntry> = self.cache.lock().await.values().cloned().collect();
        let state = PersistedState {
            entries,
            quota_used: self.quota_used.load(Ordering::Relaxed),
            quota_day: self.quota_day.load(Ordering::Relaxed),
        };
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| GatewayError::Persistence(e.to_string()))?;
        if let Some(parent) = self.cache_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GatewayError::Persistence(e.to_string()))?;
        }
        tokio::fs::write(&self.cache_path, json)
            .await
            .map_err(|e| GatewayError::Persistence(e.to_string()))?;
        Ok(())
    }

    fn roll_quota_day(&self) {
        let today = now_epoch_secs() / SECS_PER_DAY;
        if self.quota_day.swap(today, Ordering::Relaxed) != today {
            self.quota_used.store(0, Ordering::Relaxed);
        }
    }

    pub fn quota_remaining(&self) -> u32 {
        self.roll_quota_day();
        self.config
            .daily_quota
            .saturating_sub(self.quota_used.load(Ordering::Relaxed))
    }

    pub async fn allow(&self, ip: IpAddr) {
        self.allow_list.lock().await.insert(ip);
    }

    pub async fn is_allowed(&self, ip: IpAddr) -> bool {
        self.allow_list.lock().await.contains(&ip)
    }

    pub async fn cache_size(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Evict the oldest quarter of entries once the cache is full, freeing
    /// room without a full flush.
    async fn evict_oldest_quarter(cache: &mut HashMap<IpAddr, CacheEntry>) {
        if cache.len() < MAX_CACHE_ENTRIES {
            return;
        }
        let mut by_age: Vec<(IpAddr, u64)> =
            cache.iter().map(|(ip, e)| (*ip, e.fetched_at_secs)).collect();
        by_age.sort_by_key(|(_, secs)| *secs);
        let evict_count = by_age.len() / 4;
        for (ip, _) in by_age.into_iter().take(evict_count.max(1)) {
            cache.remove(&ip);
        }
    }

    /// Look up `ip`'s reputation. Cache-hit and private/allow-listed
    /// addresses never touch the network.
    pub async fn check(&self, ip: IpAddr) -> Lookup {
        if is_private_or_reserved(ip) {
            return Lookup {
                record: None,
                verdict: Verdict::Allow,
                source: "private",
            };
        }
        if !self.config.enabled {
            return Lookup {
                record: None,
                verdict: Verdict::Allow,
                source: "disabled",
            };
        }
        if self.is_allowed(ip).await {
            return Lookup {
                record: None,
                verdict: Verdict::Allow,
                source: "allow_list",
            };
        }

        let now = now_epoch_secs();
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&ip) {
                if now.saturating_sub(entry.fetched_at_secs) < self.ttl().as_secs() {
                    return Lookup {
                        verdict: self.verdict_for(entry.record.score),
                        record: Some(entry.record.clone()),
                        source: "cache",
                    };
                }
            }
        }

        if self.config.api_key.trim().is_empty() {
            return Lookup {
                record: None,
                verdict: Verdict::Allow,
                source: "no_api_key",
            };
        }

        if self.quota_remaining() == 0 {
            return Lookup {
                record: None,
                verdict: Verdict::Allow,
                source: "rate_limited",
            };
        }

        match self.fetch_provider(ip).await {
            Ok(record) => {
                self.quota_used.fetch_add(1, Ordering::Relaxed);
                let verdict = self.verdict_for(record.score);
                let mut cache = self.cache.lock().await;
                Self::evict_oldest_quarter(&mut cache).await;
                cache.insert(
                    ip,
                    CacheEntry {
                        ip,
                        record: record.clone(),
                        fetched_at_secs: now,
                    },
                );
                Lookup {
                    record: Some(record),
                    verdict,
                    source: "provider",
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, %ip, "ip reputation provider lookup failed, failing open");
                Lookup {
                    record: None,
                    verdict: Verdict::Allow,
                    source: "provider_error",
                }
            }
        }
    }

    async fn fetch_provider(&self, ip: IpAddr) -> Result<ReputationRecord, GatewayError> {
        let resp: AbuseIpDbResponse = self
            .client
            .get(PROVIDER_CHECK_URL)
            .header("Key", &self.config.api_key)
            .header("Accept", "application/json")
            .query(&[("ipAddress", ip.to_string()), ("maxAgeInDays", "90".to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let categories: Vec<u16> = resp
            .data
            .reports
            .into_iter()
            .flat_map(|r| r.categories)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(ReputationRecord {
            score: resp.data.abuse_confidence_score,
            total_reports: resp.data.total_reports,
            categories,
            country_code: resp.data.country_code,
            isp: resp.data.isp,
        })
    }

    /// Report `ip` to the external provider under the given category IDs.
    pub async fn report(
        &self,
        ip: IpAddr,
        categories: &[u16],
        comment: &str,
    ) -> Result<(), GatewayError> {
        let category_list = categories
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");

        self.client
            .post(PROVIDER_REPORT_URL)
            .header("Key", &self.config.api_key)
            .header("Accept", "application/json")
            .form(&[
                ("ip", ip.to_string()),
                ("categories", category_list),
                ("comment", comment.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ReputationConfig {
        ReputationConfig {
            enabled: true,
            api_key: "test-key".to_string(),
            block_threshold: 80,
            warn_threshold: 50,
            check_mode: "async".to_string(),
            cache_ttl_ms: 3_600_000,
            daily_quota: 5,
            cache_path: "/tmp/aegis-gateway-test-reputation-cache.json".to_string(),
        }
    }

    #[tokio::test]
    async fn private_ips_always_allow() {
        let engine = ReputationEngine::new(cfg());
        let lookup = engine.check("192.168.1.1".parse().unwrap()).await;
        assert_eq!(lookup.verdict, Verdict::Allow);
        assert_eq!(lookup.source, "private");
    }

    #[tokio::test]
    async fn loopback_v6_allows() {
        let engine = ReputationEngine::new(cfg());
        let lookup = engine.check("::1".parse().unwrap()).await;
        assert_eq!(lookup.verdict, Verdict::Allow);
        assert_eq!(lookup.source, "private");
    }

    #[tokio::test]
    async fn unique_local_v6_allows() {
        let engine = ReputationEngine::new(cfg());
        let lookup = engine.check("fd12:3456:789a::1".parse().unwrap()).await;
        assert_eq!(lookup.source, "private");
    }

    #[tokio::test]
    async fn allow_listed_ip_bypasses_quota() {
        let engine = ReputationEngine::new(cfg());
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        engine.allow(ip).await;
        let lookup = engine.check(ip).await;
        assert_eq!(lookup.verdict, Verdict::Allow);
        assert_eq!(lookup.source, "allow_list");
    }

    #[tokio::test]
    async fn verdict_thresholds() {
        let engine = ReputationEngine::new(cfg());
        assert_eq!(engine.verdict_for(10), Verdict::Allow);
        assert_eq!(engine.verdict_for(60), Verdict::Warn);
        assert_eq!(engine.verdict_for(95), Verdict::Block);
    }

    #[tokio::test]
    async fn quota_remaining_reflects_usage() {
        let engine = ReputationEngine::new(cfg());
        assert_eq!(engine.quota_remaining(), 5);
        engine.quota_used.fetch_add(3, Ordering::Relaxed);
        assert_eq!(engine.quota_remaining(), 2);
    }

    #[test]
    fn private_address_ranges() {
        assert!(is_private_or_reserved("10.0.0.1".parse().unwrap()));
        assert!(is_private_or_reserved("172.16.0.1".parse().unwrap()));
        assert!(is_private_or_reserved("169.254.1.1".parse().unwrap()));
        assert!(!is_private_or_reserved("8.8.8.8".parse().unwrap()));
        assert!(is_private_or_reserved("fe80::1".parse().unwrap()));
        assert!(!is_private_or_reserved("2001:4860:4860::8888".parse().unwrap()));
    }
}
