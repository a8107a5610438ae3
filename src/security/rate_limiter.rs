use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Why a `track` call resolved the way it did — surfaced for logging and
/// for the `Retry-After` / `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Allowed,
    RateLimitExceeded,
    Blocked,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub blocked: bool,
    pub remaining: u32,
    pub reset: Duration,
    pub reason: Reason,
}

#[derive(Debug, Clone, Copy)]
pub struct KeyStats {
    pub total_requests: u64,
    pub total_blocks: u64,
    pub blocked: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalStats {
    pub tracked_keys: usize,
    pub currently_blocked: usize,
    pub total_requests: u64,
    pub total_blocks: u64,
}

struct ClientRecord {
    timestamps: VecDeque<Instant>,
    blocked: bool,
    blocked_until: Instant,
    total_requests: u64,
    total_blocks: u64,
}

impl ClientRecord {
    fn new(now: Instant) -> Self {
        Self {
            timestamps: VecDeque::new(),
            blocked: false,
            blocked_until: now,
            total_requests: 0,
            total_blocks: 0,
        }
    }
}

/// Per-key sliding-window rate limiter.
///
/// Each key's record is guarded by its own `tokio::sync::Mutex` so that a
/// hot key never blocks unrelated keys — the `DashMap` itself is already
/// internally sharded, so this gives two independent levels of isolation.
pub struct RateLimiter {
    records: DashMap<String, Arc<Mutex<ClientRecord>>>,
    last_touched: DashMap<String, AtomicU64>,
    window: Duration,
    max_requests: u32,
    block_duration: Duration,
    started_at: Instant,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32, block_duration: Duration) -> Self {
        Self {
            records: DashMap::new(),
            last_touched: DashMap::new(),
            window,
            max_requests,
            block_duration,
            started_at: Instant::now(),
        }
    }

    fn now_secs(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.started_at).as_secs()
    }

    fn touch(&self, key: &str, now: Instant) {
        let secs = self.now_secs(now);
        self.last_touched
            .entry(key.to_string())
            .and_modify(|v| v.store(secs, Ordering::Relaxed))
            .or_insert_with(|| AtomicU64::new(secs));
    }

    fn record_for(&self, key: &str, now: Instant) -> Arc<Mutex<ClientRecord>> {
        if let Some(entry) = self.records.get(key) {
            return entry.value().clone();
        }
        self.records
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ClientRecord::new(now))))
            .clone()
    }

    /// Decide whether one more request from `key` is admissible at `now`.
    pub async fn track(&self, key: &str, now: Instant) -> Decision {
        self.touch(key, now);
        let record = self.record_for(key, now);
        let mut rec = record.lock().await;

        if rec.blocked {
            if now < rec.blocked_until {
                return Decision {
                    allowed: false,
                    blocked: true,
                    remaining: 0,
                    reset: rec.blocked_until - now,
                    reason: Reason::Blocked,
                };
            }
            rec.blocked = false;
            rec.timestamps.clear();
        }

        while let Some(&front) = rec.timestamps.front() {
            if now.saturating_duration_since(front) > self.window {
                rec.timestamps.pop_front();
            } else {
                break;
            }
        }

        rec.timestamps.push_back(now);
        rec.total_requests += 1;

        if rec.timestamps.len() as u32 > self.max_requests {
            rec.blocked = true;
            rec.blocked_until = now + self.block_duration;
            rec.total_blocks += 1;
            return Decision {
                allowed: false,
                blocked: true,
                remaining: 0,
                reset: self.block_duration,
                reason: Reason::RateLimitExceeded,
            };
        }

        let remaining = self.max_requests - rec.timestamps.len() as u32;
        let reset = rec
            .timestamps
            .front()
            .map(|&first| (first + self.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        Decision {
            allowed: true,
            blocked: false,
            remaining,
            reset,
            reason: Reason::Allowed,
        }
    }

    pub async fn block(&self, key: &str, duration: Duration, now: Instant) {
        let record = self.record_for(key, now);
        let mut rec = record.lock().await;
        rec.blocked = true;
        rec.blocked_until = now + duration;
        rec.total_blocks += 1;
        self.touch(key, now);
    }

    pub async fn unblock(&self, key: &str) {
        if let Some(entry) = self.records.get(key) {
            let mut rec = entry.value().lock().await;
            rec.blocked = false;
            rec.timestamps.clear();
        }
    }

    pub async fn is_blocked(&self, key: &str) -> bool {
        match self.records.get(key) {
            Some(entry) => {
                let rec = entry.value().lock().await;
                rec.blocked && Instant::now() < rec.blocked_until
            }
            None => false,
        }
    }

    pub async fn stats(&self, key: &str) -> Option<KeyStats> {
        let entry = self.records.get(key)?;
        let rec = entry.value().lock().await;
        Some(KeyStats {
            total_requests: rec.total_requests,
            total_blocks: rec.total_blocks,
            blocked: rec.blocked,
        })
    }

    pub async fn global_stats(&self) -> GlobalStats {
        let mut stats = GlobalStats {
            tracked_keys: self.records.len(),
            ..Default::default()
        };
        for entry in self.records.iter() {
            let rec = entry.value().lock().await;
            stats.total_requests += rec.total_requests;
            stats.total_blocks += rec.total_blocks;
            if rec.blocked {
                stats.currently_blocked += 1;
            }
        }
        stats
    }

    pub async fn blocked_keys(&self) -> Vec<String> {
        let mut out = Vec::new();
        for entry in self.records.iter() {
            let rec = entry.value().lock().await;
            if rec.blocked {
                out.push(entry.key().clone());
            }
        }
        out
    }

    /// Evict records that are idle beyond the window and not currently
    /// blocked. Called from the gateway's janitor task on `cleanup_interval`.
    pub async fn evict_idle(&self, now: Instant) {
        let idle_secs = self.window.as_secs().max(1);
        let threshold = self.now_secs(now).saturating_sub(idle_secs);

        let stale_keys: Vec<String> = self
            .last_touched
            .iter()
            .filter(|e| e.value().load(Ordering::Relaxed) < threshold)
            .map(|e| e.key().clone())
            .collect();

        for key in stale_keys {
            if let Some(entry) = self.records.get(&key) {
                let rec = entry.value().lock().await;
                if rec.blocked {
                    continue;
                }
                drop(rec);
            } else {
                continue;
            }
            self.records.remove(&key);
            self.last_touched.remove(&key);
        }
    }

    /// Spawn the periodic janitor. Stops draining on shutdown notification.
    pub fn start_janitor(self: &Arc<Self>, interval: Duration, shutdown: Arc<tokio::sync::Notify>) {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.notified() => return,
                }
                limiter.evict_idle(Instant::now()).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_max_then_blocks() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 5, Duration::from_secs(2));
        let now = Instant::now();

        for _ in 0..5 {
            let d = limiter.track("1.2.3.4", now).await;
            assert!(d.allowed);
        }
        let d = limiter.track("1.2.3.4", now).await;
        assert!(!d.allowed);
        assert!(d.blocked);
        assert_eq!(d.reason, Reason::RateLimitExceeded);
    }

    #[tokio::test]
    async fn unblocks_after_block_duration() {
        let limiter = RateLimiter::new(Duration::from_millis(100), 2, Duration::from_millis(50));
        let now = Instant::now();

        assert!(limiter.track("k", now).await.allowed);
        assert!(limiter.track("k", now).await.allowed);
        assert!(!limiter.track("k", now).await.allowed);

        let later = now + Duration::from_millis(60);
        let d = limiter.track("k", later).await;
        assert!(d.allowed);
    }

    #[tokio::test]
    async fn independent_keys() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.track("a", now).await.allowed);
        assert!(limiter.track("b", now).await.allowed);
        assert!(!limiter.track("a", now).await.allowed);
    }

    #[tokio::test]
    async fn block_and_unblock_round_trip() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 100, Duration::from_secs(60));
        let now = Instant::now();
        limiter.track("k", now).await;
        limiter.block("k", Duration::from_secs(10), now).await;
        assert!(limiter.is_blocked("k").await);
        limiter.unblock("k").await;
        assert!(!limiter.is_blocked("k").await);
    }

    #[tokio::test]
    async fn total_requests_non_decreasing() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1000, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..10 {
            limiter.track("k", now).await;
        }
        let stats = limiter.stats("k").await.unwrap();
        assert_eq!(stats.total_requests, 10);
    }
}
