//! Persistent per-provider rate-limit state (C12).
//!
//! Grounded in the teacher's atomic-write conventions in
//! `storage::lance_store` (write-then-rename) and in `agent::metrics`'s
//! pattern of a `DashMap`-backed, periodically-flushed state map; no direct
//! teacher analogue tracks provider rate limits, so the persistence shape
//! is new but follows the same idioms.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::RateLimitError;

/// One provider's persisted availability state, per §3 "Provider state".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderState {
    pub rate_limited_until: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub total_successes: u64,
    pub total_failures: u64,
}

impl ProviderState {
    /// `now < rate_limited_until`, per §4.10.
    fn is_unavailable(&self, now: DateTime<Utc>) -> bool {
        matches!(self.rate_limited_until, Some(until) if now < until)
    }
}

const MAX_BACKOFF: chrono::Duration = chrono::Duration::days(7);

/// Parses a window string `Nd | Nh | Nm | N` (bare `N` means seconds), per
/// §4.10's `recordRateLimit` contract.
fn parse_window(window: &str) -> Option<chrono::Duration> {
    let window = window.trim();
    let (digits, unit) = match window.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&window[..window.len() - 1], c),
        _ => (window, 's'),
    };
    let n: i64 = digits.parse().ok()?;
    match unit {
        'd' => Some(chrono::Duration::days(n)),
        'h' => Some(chrono::Duration::hours(n)),
        'm' => Some(chrono::Duration::minutes(n)),
        's' => Some(chrono::Duration::seconds(n)),
        _ => None,
    }
}

/// Exponential backoff for consecutive failures: `2^(k-1)` hours, capped at
/// 7 days.
fn consecutive_failure_backoff(consecutive_failures: u32) -> chrono::Duration {
    if consecutive_failures == 0 {
        return chrono::Duration::zero();
    }
    let hours = 2f64.powi(consecutive_failures as i32 - 1);
    let backoff = chrono::Duration::seconds((hours * 3600.0) as i64);
    backoff.min(MAX_BACKOFF)
}

/// Process-wide, provider-keyed rate-limit gate. Persists to a fixed JSON
/// path on every mutation and can be flushed on a timer by the caller.
pub struct RateLimitStore {
    states: DashMap<String, ProviderState>,
    path: PathBuf,
}

impl RateLimitStore {
    /// Loads from `path`, tolerating a missing or corrupt file by starting
    /// fresh, per §4.10.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let states = Self::read_states(&path);
        Self { states, path }
    }

    fn read_states(path: &Path) -> DashMap<String, ProviderState> {
        let map = DashMap::new();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return map,
        };
        match serde_json::from_str::<HashMap<String, ProviderState>>(&content) {
            Ok(parsed) => {
                for (provider, state) in parsed {
                    map.insert(provider, state);
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "rate-limit state file is corrupt, starting fresh"),
        }
        map
    }

    /// Persists the full state map atomically: write to a sibling temp file,
    /// then rename over the target, per §5's "per-file locking via atomic
    /// rename on write".
    pub fn persist(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot: HashMap<String, ProviderState> =
            self.states.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect();
        let json = serde_json::to_string_pretty(&snapshot)?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn state(&self, provider: &str) -> ProviderState {
        self.states.get(provider).map(|s| s.clone()).unwrap_or_default()
    }

    /// `now < rate_limited_until`; clears and persists expired state.
    pub fn is_available(&self, provider: &str) -> bool {
        let now = Utc::now();
        let unavailable = self
            .states
            .get(provider)
            .map(|s| s.is_unavailable(now))
            .unwrap_or(false);

        if !unavailable {
            if let Some(mut entry) = self.states.get_mut(provider) {
                if entry.rate_limited_until.is_some() {
                    entry.rate_limited_until = None;
                    drop(entry);
                    if let Err(e) = self.persist() {
                        warn!(provider, error = %e, "failed to persist cleared rate-limit state");
                    }
                }
            }
        }
        !unavailable
    }

    /// Records an authoritative or window-derived rate limit. `reset_time`
    /// wins when present; otherwise `window` (`Nd|Nh|Nm|N`) is parsed
    /// relative to now. Consecutive-failure backoff is applied on top and
    /// the later of the two deadlines is kept.
    pub fn record_rate_limit(&self, provider: &str, reset_time: Option<DateTime<Utc>>, window: &str) {
        let now = Utc::now();
        let mut entry = self.states.entry(provider.to_string()).or_default();
        entry.consecutive_failures += 1;
        entry.total_failures += 1;
        entry.last_failure = Some(now);

        let window_deadline = reset_time.unwrap_or_else(|| now + parse_window(window).unwrap_or_else(chrono::Duration::zero));
        let backoff_deadline = now + consecutive_failure_backoff(entry.consecutive_failures);
        entry.rate_limited_until = Some(window_deadline.max(backoff_deadline));
        drop(entry);

        debug!(provider, "recorded rate limit");
        if let Err(e) = self.persist() {
            warn!(provider, error = %e, "failed to persist rate-limit state");
        }
    }

    pub fn record_success(&self, provider: &str) {
        let now = Utc::now();
        let mut entry = self.states.entry(provider.to_string()).or_default();
        entry.consecutive_failures = 0;
        entry.total_successes += 1;
        entry.last_success = Some(now);
        entry.rate_limited_until = None;
        drop(entry);

        if let Err(e) = self.persist() {
            warn!(provider, error = %e, "failed to persist rate-limit state");
        }
    }

    /// Records a non-rate-limit failure (e.g. a 5xx), accumulating
    /// consecutive-failure backoff without a window string.
    pub fn record_failure(&self, provider: &str) {
        let now = Utc::now();
        let mut entry = self.states.entry(provider.to_string()).or_default();
        entry.consecutive_failures += 1;
        entry.total_failures += 1;
        entry.last_failure = Some(now);
        entry.rate_limited_until = Some(now + consecutive_failure_backoff(entry.consecutive_failures));
        drop(entry);

        if let Err(e) = self.persist() {
            warn!(provider, error = %e, "failed to persist rate-limit state");
        }
    }

    /// Spawns the 5-minute persistence timer described in §4.10. Returns a
    /// handle the caller can abort on shutdown.
    pub fn spawn_periodic_flush(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                if let Err(e) = self.persist() {
                    warn!(error = %e, "periodic rate-limit state flush failed");
                }
            }
        })
    }
}

/// Parses authoritative rate-limit headers (`Retry-After` seconds or
/// HTTP-date, `X-RateLimit-Reset` epoch seconds or ISO-8601). Never guesses:
/// returns `RateLimitDecisionException` if neither header is present or
/// parseable, per §4.14.
pub fn resolve_rate_limit_reset(
    retry_after: Option<&str>,
    x_rate_limit_reset: Option<&str>,
) -> Result<DateTime<Utc>, RateLimitError> {
    if let Some(value) = retry_after {
        if let Ok(seconds) = value.trim().parse::<i64>() {
            return Ok(Utc::now() + chrono::Duration::seconds(seconds));
        }
        if let Ok(date) = DateTime::parse_from_rfc2822(value.trim()) {
            return Ok(date.with_timezone(&Utc));
        }
    }
    if let Some(value) = x_rate_limit_reset {
        let value = value.trim();
        if let Ok(epoch_seconds) = value.parse::<i64>() {
            if let Some(dt) = DateTime::from_timestamp(epoch_seconds, 0) {
                return Ok(dt);
            }
        }
        if let Ok(date) = DateTime::parse_from_rfc3339(value) {
            return Ok(date.with_timezone(&Utc));
        }
    }
    Err(RateLimitError::RateLimitDecisionException)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_at(path: PathBuf) -> RateLimitStore {
        RateLimitStore::load(path)
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("ragcore-ratelimit-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn unavailable_until_window_expires() {
        let store = store_at(temp_path());
        store.record_rate_limit("openai", Some(Utc::now() + chrono::Duration::seconds(10)), "1h");
        assert!(!store.is_available("openai"));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let store = store_at(temp_path());
        store.record_rate_limit("openai", Some(Utc::now() - chrono::Duration::seconds(1)), "1h");
        store.record_success("openai");
        assert_eq!(store.state("openai").consecutive_failures, 0);
        assert!(store.is_available("openai"));
    }

    #[test]
    fn unknown_provider_is_available_by_default() {
        let store = store_at(temp_path());
        assert!(store.is_available("never-seen"));
    }

    #[test]
    fn parse_window_variants() {
        assert_eq!(parse_window("1h"), Some(chrono::Duration::hours(1)));
        assert_eq!(parse_window("2d"), Some(chrono::Duration::days(2)));
        assert_eq!(parse_window("30m"), Some(chrono::Duration::minutes(30)));
        assert_eq!(parse_window("45"), Some(chrono::Duration::seconds(45)));
    }

    #[test]
    fn consecutive_failure_backoff_doubles_and_caps() {
        assert_eq!(consecutive_failure_backoff(1), chrono::Duration::hours(1));
        assert_eq!(consecutive_failure_backoff(2), chrono::Duration::hours(2));
        assert_eq!(consecutive_failure_backoff(10), MAX_BACKOFF);
    }

    #[test]
    fn resolve_rate_limit_reset_prefers_retry_after_seconds() {
        let resolved = resolve_rate_limit_reset(Some("30"), None).unwrap();
        assert!(resolved > Utc::now());
    }

    #[test]
    fn resolve_rate_limit_reset_fails_without_authoritative_headers() {
        assert!(resolve_rate_limit_reset(None, None).is_err());
    }

    #[test]
    fn persist_and_reload_roundtrips() {
        let path = temp_path();
        {
            let store = store_at(path.clone());
            store.record_rate_limit("openai", Some(Utc::now() + chrono::Duration::seconds(10)), "1h");
        }
        let reloaded = store_at(path.clone());
        assert!(!reloaded.is_available("openai"));
        let _ = std::fs::remove_file(&path);
    }
}
