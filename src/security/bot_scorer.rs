use crate::config::BotDetectionConfig;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

const KNOWN_BOT_MARKERS: &[&str] = &[
    "googlebot", "bingbot", "slurp", "duckduckbot", "baiduspider", "yandexbot",
    "sogou", "facebot", "ia_archiver", "semrushbot", "ahrefsbot", "mj12bot",
    "dotbot", "petalbot", "bytespider",
];

const KNOWN_GOOD_BOT_MARKERS: &[&str] = &["googlebot", "bingbot", "duckduckbot"];

const SUSPICIOUS_UA_MARKERS: &[&str] = &[
    "python-requests", "python-urllib", "curl", "wget", "httpie", "postman",
    "insomnia", "axios", "node-fetch", "go-http-client", "java", "libwww",
    "lwp-trivial", "php", "ruby",
];

const BAD_UA_PATTERNS: &[&str] = &[
    "sqlmap", "nikto", "nmap", "masscan", "zgrab", "nessus", "openvas", "burp",
    "owasp", "acunetix", "dirbuster", "gobuster", "wfuzz", "hydra", "medusa",
];

const RAPID_WINDOW: Duration = Duration::from_secs(10);
const RAPID_GAP_THRESHOLD: Duration = Duration::from_millis(100);

/// Signal inputs the scorer reads off a single request. Header presence is
/// what matters, not content, except for user-agent substrings.
#[derive(Debug, Clone, Default)]
pub struct RequestSignals {
    pub user_agent: Option<String>,
    pub has_accept: bool,
    pub has_accept_language: bool,
    pub has_accept_encoding: bool,
    pub forwarded_for_present: bool,
    pub via_present: bool,
    pub connection_close: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Human,
    Bot,
}

#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub score: u8,
    pub verdict: Verdict,
    pub reasons: Vec<String>,
}

struct PatternRecord {
    hits: VecDeque<Instant>,
}

impl PatternRecord {
    fn new() -> Self {
        Self {
            hits: VecDeque::new(),
        }
    }
}

/// Scores a request's bot-likelihood from static header signals plus a
/// short rolling request-rate signal per key.
pub struct BotScorer {
    config: BotDetectionConfig,
    patterns: DashMap<String, Arc<Mutex<PatternRecord>>>,
    last_touched: DashMap<String, AtomicU64>,
    started_at: Instant,
}

impl BotScorer {
    pub fn new(config: BotDetectionConfig) -> Self {
        Self {
            config,
            patterns: DashMap::new(),
            last_touched: DashMap::new(),
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

    pub fn is_known_good_bot(ua: &str) -> bool {
        KNOWN_GOOD_BOT_MARKERS.iter().any(|m| ua.contains(m))
    }

    /// Rolling request-rate signal over a 10s window: +15 if the gap from
    /// the previous request is positive and under 100ms, plus +20/+10 once
    /// the window holds more than 20/10 hits. The two bonuses stack.
    async fn rapid_requests_score(&self, key: &str, now: Instant) -> u8 {
        let entry = self
            .patterns
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PatternRecord::new())))
            .clone();
        let mut rec = entry.lock().await;

        let prev = rec.hits.back().copied();

        while let Some(&front) = rec.hits.front() {
            if now.saturating_duration_since(front) > RAPID_WINDOW {
                rec.hits.pop_front();
            } else {
                break;
            }
        }
        rec.hits.push_back(now);
        self.touch(key, now);

        let mut score = 0u8;
        if let Some(prev) = prev {
            let gap = now.saturating_duration_since(prev);
            if gap > Duration::ZERO && gap < RAPID_GAP_THRESHOLD {
                score += 15;
            }
        }
        let len = rec.hits.len();
        if len > 20 {
            score += 20;
        } else if len > 10 {
            score += 10;
        }
        score
    }

    /// Score a single request. `key` identifies the client for the rolling
    /// request-rate signal (the same key the rate limiter uses).
    pub async fn score(&self, key: &str, signals: &RequestSignals, now: Instant) -> ScoreResult {
        if !self.config.enabled {
            return ScoreResult {
                score: 0,
                verdict: Verdict::Human,
                reasons: vec![],
            };
        }

        let ua = signals.user_agent.as_deref().unwrap_or("");
        let ua_lower = ua.to_ascii_lowercase();

        let mut score: u16 = 0;
        let mut reasons = Vec::new();

        if ua.trim().len() < 10 {
            score += 30;
            reasons.push("missing_or_short_ua".to_string());
        }
        if let Some(p) = BAD_UA_PATTERNS.iter().find(|p| ua_lower.contains(**p)) {
            score += 50;
            reasons.push(format!("bad_pattern:{}", p));
        } else if let Some(p) = KNOWN_BOT_MARKERS.iter().find(|p| ua_lower.contains(**p)) {
            score += 20;
            reasons.push(format!("known_bot:{}", p));
        } else if let Some(p) = SUSPICIOUS_UA_MARKERS.iter().find(|p| ua_lower.contains(**p)) {
            score += 15;
            reasons.push(format!("suspicious_ua:{}", p));
        }
        if !signals.has_accept {
            score += 10;
            reasons.push("missing_accept".to_string());
        }
        if !signals.has_accept_language {
            score += 10;
            reasons.push("missing_accept_language".to_string());
        }
        if !signals.has_accept_encoding {
            score += 5;
            reasons.push("missing_accept_encoding".to_string());
        }
        if signals.forwarded_for_present && !signals.via_present {
            score += 5;
            reasons.push("proxy_without_via".to_string());
        }
        if signals.connection_close {
            score += 5;
            reasons.push("connection_close".to_string());
        }

        let rapid = self.rapid_requests_score(key, now).await;
        if rapid > 0 {
            score += rapid as u16;
            reasons.push("rapid_requests".to_string());
        }

        let score = score.min(100) as u8;
        let verdict = if score >= self.config.score_threshold {
            Verdict::Bot
        } else {
            Verdict::Human
        };

        ScoreResult {
            score,
            verdict,
            reasons,
        }
    }

    pub async fn evict_idle(&self, now: Instant) {
        let threshold = self.now_secs(now).saturating_sub(60);
        let stale: Vec<String> = self
            .last_touched
            .iter()
            .filter(|e| e.value().load(Ordering::Relaxed) < threshold)
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            self.patterns.remove(&key);
            self.last_touched.remove(&key);
        }
    }

    pub fn start_janitor(self: &Arc<Self>, interval: Duration, shutdown: Arc<Notify>) {
        let scorer = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.notified() => return,
                }
                scorer.evict_idle(Instant::now()).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BotDetectionConfig {
        BotDetectionConfig {
            enabled: true,
            score_threshold: 70,
            allow_good_bots: true,
        }
    }

    fn full_signals(ua: &str) -> RequestSignals {
        RequestSignals {
            user_agent: Some(ua.to_string()),
            has_accept: true,
            has_accept_language: true,
            has_accept_encoding: true,
            forwarded_for_present: false,
            via_present: false,
            connection_close: false,
        }
    }

    #[tokio::test]
    async fn normal_browser_scores_low() {
        let scorer = BotScorer::new(cfg());
        let signals = full_signals(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
        );
        let r = scorer.score("1.1.1.1", &signals, Instant::now()).await;
        assert_eq!(r.verdict, Verdict::Human);
    }

    #[tokio::test]
    async fn missing_headers_accumulate_score() {
        let scorer = BotScorer::new(cfg());
        let signals = RequestSignals {
            user_agent: Some("curl/8.0".to_string()),
            has_accept: false,
            has_accept_language: false,
            has_accept_encoding: false,
            forwarded_for_present: false,
            via_present: false,
            connection_close: false,
        };
        let r = scorer.score("2.2.2.2", &signals, Instant::now()).await;
        assert_eq!(r.verdict, Verdict::Bot);
        assert!(r.reasons.iter().any(|r| r == "suspicious_ua:curl"));
    }

    #[tokio::test]
    async fn known_good_bot_still_reports_real_verdict() {
        // The good-bot allowlist bypass lives in the pipeline, not here —
        // score() always reports the signal it actually matched, with the
        // bot name captured in the reason rather than swallowed.
        let scorer = BotScorer::new(cfg());
        let signals = full_signals("Googlebot/2.1 (+http://www.google.com/bot.html)");
        let r = scorer.score("3.3.3.3", &signals, Instant::now()).await;
        assert!(r.reasons.iter().any(|r| r == "known_bot:googlebot"));
        assert!(BotScorer::is_known_good_bot("googlebot/2.1"));
    }

    #[tokio::test]
    async fn bad_pattern_scores_as_bot_alone() {
        let scorer = BotScorer::new(cfg());
        let signals = full_signals("sqlmap/1.7");
        let r = scorer.score("4.4.4.4", &signals, Instant::now()).await;
        assert_eq!(r.verdict, Verdict::Bot);
        assert!(r.reasons.iter().any(|r| r == "bad_pattern:sqlmap"));
    }

    #[tokio::test]
    async fn rapid_requests_raise_score_over_time() {
        let scorer = BotScorer::new(cfg());
        let signals = full_signals("Mozilla/5.0 (Macintosh) Safari/605.1.15 Gecko");
        let now = Instant::now();
        let mut last_score = 0;
        for i in 0..25 {
            let tick = now + Duration::from_millis(i * 10);
            let r = scorer.score("5.5.5.5", &signals, tick).await;
            last_score = r.score;
        }
        assert!(last_score > 0);
    }

    #[tokio::test]
    async fn proxy_without_via_header_scores() {
        let scorer = BotScorer::new(cfg());
        let mut signals = full_signals("Mozilla/5.0 (Macintosh) Safari/605.1.15 Gecko");
        signals.forwarded_for_present = true;
        signals.via_present = false;
        let r = scorer.score("7.7.7.7", &signals, Instant::now()).await;
        assert!(r.reasons.iter().any(|r| r == "proxy_without_via"));
    }

    #[tokio::test]
    async fn disabled_config_always_human() {
        let mut c = cfg();
        c.enabled = false;
        let scorer = BotScorer::new(c);
        let signals = full_signals("sqlmap/1.7");
        let r = scorer.score("6.6.6.6", &signals, Instant::now()).await;
        assert_eq!(r.score, 0);
        assert_eq!(r.verdict, Verdict::Human);
    }
}
