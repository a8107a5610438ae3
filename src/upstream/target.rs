use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A single upstream origin the forwarder can send requests to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub original: String,
}

impl UpstreamTarget {
    pub fn parse(raw: &str) -> Option<Self> {
        let url = reqwest::Url::parse(raw).ok()?;
        let host = url.host_str()?.to_string();
        let scheme = url.scheme().to_string();
        let port = url
            .port()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });
        Some(Self {
            scheme,
            host,
            port,
            original: raw.to_string(),
        })
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetHealth {
    Healthy,
    Unhealthy,
}

/// Lock-free read-mostly pool of upstream targets, selected by unweighted
/// round robin. `targets` and `cursor` never need to agree on a single
/// atomic operation — a stale cursor read against a freshly swapped list
/// simply wraps modulo the new length, which is always a valid index.
pub struct TargetPool {
    targets: ArcSwap<Vec<UpstreamTarget>>,
    health: ArcSwap<Vec<AtomicBool>>,
    cursor: AtomicUsize,
}

impl TargetPool {
    pub fn new(targets: Vec<UpstreamTarget>) -> Self {
        let health = targets.iter().map(|_| AtomicBool::new(true)).collect();
        Self {
            targets: ArcSwap::from_pointee(targets),
            health: ArcSwap::from_pointee(health),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Atomically replace the full target list. Resets the round-robin
    /// cursor and marks every new target healthy by default.
    pub fn update_targets(&self, targets: Vec<UpstreamTarget>) {
        let health: Vec<AtomicBool> = targets.iter().map(|_| AtomicBool::new(true)).collect();
        self.targets.store(Arc::new(targets));
        self.health.store(Arc::new(health));
        self.cursor.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.targets.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<UpstreamTarget> {
        self.targets.load().as_ref().clone()
    }

    pub fn mark_health(&self, addr: &str, healthy: bool) {
        let targets = self.targets.load();
        let health = self.health.load();
        for (t, h) in targets.iter().zip(health.iter()) {
            if t.authority() == addr {
                h.store(healthy, Ordering::Relaxed);
                return;
            }
        }
    }

    pub fn health_snapshot(&self) -> Vec<(UpstreamTarget, TargetHealth)> {
        let targets = self.targets.load();
        let health = self.health.load();
        targets
            .iter()
            .zip(health.iter())
            .map(|(t, h)| {
                let state = if h.load(Ordering::Relaxed) {
                    TargetHealth::Healthy
                } else {
                    TargetHealth::Unhealthy
                };
                (t.clone(), state)
            })
            .collect()
    }

    /// Next target, plain unweighted round robin. Health is tracked for
    /// observability (`health_snapshot`) only and never gates selection.
    pub fn next(&self) -> Option<UpstreamTarget> {
        let targets = self.targets.load();
        let len = targets.len();
        if len == 0 {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        targets.get(idx).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(port: u16) -> UpstreamTarget {
        UpstreamTarget {
            scheme: "http".to_string(),
            host: "svc".to_string(),
            port,
            original: format!("http://svc:{port}"),
        }
    }

    #[test]
    fn round_robins_across_targets() {
        let pool = TargetPool::new(vec![target(1), target(2), target(3)]);
        let picks: Vec<u16> = (0..6).map(|_| pool.next().unwrap().port).collect();
        assert_eq!(picks, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn empty_pool_returns_none() {
        let pool = TargetPool::empty();
        assert!(pool.next().is_none());
    }

    #[test]
    fn update_targets_resets_cursor() {
        let pool = TargetPool::new(vec![target(1), target(2)]);
        pool.next();
        pool.update_targets(vec![target(9)]);
        assert_eq!(pool.next().unwrap().port, 9);
    }

    #[test]
    fn mark_health_does_not_affect_selection() {
        let pool = TargetPool::new(vec![target(1), target(2)]);
        pool.mark_health(&target(1).authority(), false);
        let picks: Vec<u16> = (0..4).map(|_| pool.next().unwrap().port).collect();
        assert_eq!(picks, vec![1, 2, 1, 2]);
    }

    #[test]
    fn health_snapshot_reflects_mark_health() {
        let pool = TargetPool::new(vec![target(1), target(2)]);
        pool.mark_health(&target(1).authority(), false);
        let snapshot = pool.health_snapshot();
        assert_eq!(snapshot[0].1, TargetHealth::Unhealthy);
        assert_eq!(snapshot[1].1, TargetHealth::Healthy);
    }

    #[test]
    fn parse_defaults_port_from_scheme() {
        let t = UpstreamTarget::parse("https://example.com").unwrap();
        assert_eq!(t.port, 443);
        let t = UpstreamTarget::parse("http://example.com").unwrap();
        assert_eq!(t.port, 80);
    }
}
