//! Health monitor (C17): per-service probe state with doubling backoff.
//!
//! No direct teacher analogue probes external service health; grounded in
//! the same `DashMap` + periodic-task idioms as `rate_limit::RateLimitStore`
//! and styled after the teacher's `reqwest`-based HTTP call sites.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

const MIN_BACKOFF: Duration = Duration::from_secs(60);
const HEALTHY_BACKOFF: Duration = Duration::from_secs(3600);
const MAX_BACKOFF: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_check: DateTime<Utc>,
    pub current_backoff: Duration,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self {
            healthy: false,
            consecutive_failures: 0,
            last_check: DateTime::<Utc>::UNIX_EPOCH,
            current_backoff: MIN_BACKOFF,
        }
    }
}

/// A service's probe endpoint: GET and treat any 2xx as healthy, per §4.16.
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str) -> bool;
}

pub struct ReqwestHealthProbe {
    client: reqwest::Client,
}

impl ReqwestHealthProbe {
    pub fn new() -> Self {
        Self { client: reqwest::Client::builder().timeout(Duration::from_secs(5)).build().unwrap_or_default() }
    }
}

impl Default for ReqwestHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HealthProbe for ReqwestHealthProbe {
    async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(url, error = %e, "health probe request failed");
                false
            }
        }
    }
}

pub struct HealthMonitor {
    probe: Arc<dyn HealthProbe>,
    endpoints: HashMap<String, String>,
    states: DashMap<String, ServiceHealth>,
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>, endpoints: HashMap<String, String>) -> Self {
        Self { probe, endpoints, states: DashMap::new() }
    }

    fn record(&self, name: &str, healthy: bool) {
        let mut entry = self.states.entry(name.to_string()).or_default();
        entry.last_check = Utc::now();
        if healthy {
            entry.healthy = true;
            entry.consecutive_failures = 0;
            entry.current_backoff = HEALTHY_BACKOFF;
        } else {
            entry.healthy = false;
            entry.consecutive_failures += 1;
            let doubled = MIN_BACKOFF.saturating_mul(1u32.checked_shl(entry.consecutive_failures - 1).unwrap_or(u32::MAX));
            entry.current_backoff = doubled.min(MAX_BACKOFF);
        }
    }

    /// Runs one probe for `name` and records the result, per §4.16.
    pub async fn check(&self, name: &str) -> bool {
        let Some(url) = self.endpoints.get(name) else {
            self.record(name, false);
            return false;
        };
        let healthy = self.probe.probe(url).await;
        self.record(name, healthy);
        healthy
    }

    /// Verifies every configured service responds once at startup, per
    /// §4.16's "after application start" requirement. A monitor with no
    /// configured services is unhealthy by definition.
    pub async fn verify_all_at_startup(&self) -> bool {
        if self.endpoints.is_empty() {
            warn!("health monitor has no configured services");
            return false;
        }
        let mut all_healthy = true;
        let names: Vec<String> = self.endpoints.keys().cloned().collect();
        for name in names {
            if !self.check(&name).await {
                all_healthy = false;
            }
        }
        info!(all_healthy, "startup health verification complete");
        all_healthy
    }

    /// Returns cached health, triggering an asynchronous re-probe when the
    /// service is unhealthy and its backoff has elapsed. Always returns the
    /// state observed before any triggered re-probe completes.
    pub fn is_healthy(self: &Arc<Self>, name: &str) -> bool {
        let state = self.states.get(name).map(|s| s.clone()).unwrap_or_default();
        if state.healthy {
            return true;
        }

        let stale = Utc::now() > state.last_check + chrono::Duration::from_std(state.current_backoff).unwrap_or(chrono::Duration::zero());
        if stale {
            let monitor = Arc::clone(self);
            let name = name.to_string();
            tokio::spawn(async move {
                monitor.check(&name).await;
            });
        }
        false
    }

    pub fn state(&self, name: &str) -> ServiceHealth {
        self.states.get(name).map(|s| s.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedProbe(AtomicBool);

    #[async_trait::async_trait]
    impl HealthProbe for FixedProbe {
        async fn probe(&self, _url: &str) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn monitor(healthy: bool) -> Arc<HealthMonitor> {
        let mut endpoints = HashMap::new();
        endpoints.insert("qdrant".to_string(), "http://localhost:6333/health".to_string());
        Arc::new(HealthMonitor::new(Arc::new(FixedProbe(AtomicBool::new(healthy))), endpoints))
    }

    #[tokio::test]
    async fn success_resets_failures_and_sets_healthy_backoff() {
        let monitor = monitor(true);
        assert!(monitor.check("qdrant").await);
        let state = monitor.state("qdrant");
        assert!(state.healthy);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.current_backoff, HEALTHY_BACKOFF);
    }

    #[tokio::test]
    async fn failure_doubles_backoff_from_one_minute() {
        let monitor = monitor(false);
        assert!(!monitor.check("qdrant").await);
        assert_eq!(monitor.state("qdrant").current_backoff, Duration::from_secs(60));

        monitor.check("qdrant").await;
        assert_eq!(monitor.state("qdrant").current_backoff, Duration::from_secs(120));

        monitor.check("qdrant").await;
        assert_eq!(monitor.state("qdrant").current_backoff, Duration::from_secs(240));
    }

    #[tokio::test]
    async fn backoff_caps_at_one_day() {
        let monitor = monitor(false);
        for _ in 0..30 {
            monitor.check("qdrant").await;
        }
        assert_eq!(monitor.state("qdrant").current_backoff, MAX_BACKOFF);
    }

    #[tokio::test]
    async fn unconfigured_service_is_unhealthy() {
        let monitor = monitor(true);
        assert!(!monitor.check("not-configured").await);
    }

    #[tokio::test]
    async fn startup_verification_fails_with_no_endpoints() {
        let monitor = Arc::new(HealthMonitor::new(Arc::new(FixedProbe(AtomicBool::new(true))), HashMap::new()));
        assert!(!monitor.verify_all_at_startup().await);
    }

    #[tokio::test]
    async fn startup_verification_succeeds_when_all_services_healthy() {
        let monitor = monitor(true);
        assert!(monitor.verify_all_at_startup().await);
    }
}
