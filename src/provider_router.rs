//! Provider router (C13): ordered provider selection and fallback
//! eligibility classification.
//!
//! Grounded in the teacher's `llm::ApiProvider` enum shape and
//! `LLMManager`'s provider-selection flow (`llm/mod.rs`), narrowed to the
//! spec's closed provider set and failure-classification rules.

use crate::rate_limit::RateLimitStore;

/// The closed provider set named in the glossary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    GithubModels,
    OpenAI,
    Local,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GithubModels => "github_models",
            Provider::OpenAI => "openai",
            Provider::Local => "local",
        }
    }
}

/// A raw failure signal extracted from a provider call, classified into
/// fallback-eligibility decisions by the functions below.
#[derive(Debug, Clone, Default)]
pub struct FailureSignal {
    pub status_code: Option<u16>,
    pub is_io_error: bool,
    pub is_interrupted: bool,
    pub is_sse_error: bool,
    pub is_reactor_overflow: bool,
    pub message: String,
    /// Raw `Retry-After` header value, present only on a 429 response.
    pub retry_after: Option<String>,
    /// Raw `X-RateLimit-Reset` header value, present only on a 429 response.
    pub x_rate_limit_reset: Option<String>,
}

impl FailureSignal {
    fn message_hints(&self, hints: &[&str]) -> bool {
        let lower = self.message.to_ascii_lowercase();
        hints.iter().any(|h| lower.contains(h))
    }

    /// §4.11 "Backoff primary": rate-limit, I/O, interrupt, 401/403, 5xx, or
    /// a "sleep interrupted" message.
    pub fn is_backoff_primary(&self) -> bool {
        let status_backoff = matches!(self.status_code, Some(429) | Some(401) | Some(403))
            || matches!(self.status_code, Some(s) if (500..600).contains(&s));
        status_backoff || self.is_io_error || self.is_interrupted || self.message_hints(&["sleep interrupted"])
    }

    /// §4.11 "Completion fallback eligible".
    pub fn is_completion_fallback_eligible(&self) -> bool {
        self.is_backoff_primary()
            || matches!(self.status_code, Some(404) | Some(408))
            || self.message_hints(&["timeout", "temporarily unavailable", "connection reset", "connection closed"])
    }

    /// §4.11 "Streaming fallback eligible".
    pub fn is_streaming_fallback_eligible(&self) -> bool {
        self.is_backoff_primary()
            || self.is_sse_error
            || self.is_reactor_overflow
            || matches!(self.status_code, Some(408) | Some(409) | Some(429))
            || matches!(self.status_code, Some(s) if (500..600).contains(&s))
            || self.message_hints(&[
                "invalid stream",
                "malformed",
                "unexpected end of json input",
                "timeout",
                "temporarily unavailable",
                "connection reset",
                "connection closed",
            ])
    }
}

/// A configured provider plus whether a client is actually available for it.
pub struct ProviderSlot {
    pub provider: Provider,
    pub has_client: bool,
}

/// Tracks the short, local primary-backoff window (§4.11's "separate from
/// C12"), distinct from the persistent rate-limit store.
pub struct PrimaryBackoff {
    until: std::sync::atomic::AtomicI64,
    window_secs: u64,
}

impl PrimaryBackoff {
    pub fn new(window_secs: u64) -> Self {
        Self { until: std::sync::atomic::AtomicI64::new(0), window_secs }
    }

    pub fn trip(&self) {
        let until = chrono::Utc::now().timestamp() + self.window_secs as i64;
        self.until.store(until, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        chrono::Utc::now().timestamp() < self.until.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Ordered `(primary, secondary)` provider router. `select_available`
/// returns providers with a client configured, not in primary-backoff (the
/// primary only), and whose persistent rate-limit state permits use — in
/// that order, per §4.11.
pub struct ProviderRouter {
    primary: Provider,
    secondary: Provider,
    primary_backoff: PrimaryBackoff,
}

impl ProviderRouter {
    pub fn new(primary: Provider, secondary: Provider, primary_backoff_seconds: u64) -> Self {
        Self { primary, secondary, primary_backoff: PrimaryBackoff::new(primary_backoff_seconds) }
    }

    pub fn primary(&self) -> Provider {
        self.primary
    }

    pub fn note_primary_failure(&self, signal: &FailureSignal) {
        if signal.is_backoff_primary() {
            self.primary_backoff.trip();
        }
    }

    pub fn select_available(&self, slots: &[ProviderSlot], rate_limits: &RateLimitStore) -> Vec<Provider> {
        let ordered = [self.primary, self.secondary];
        ordered
            .into_iter()
            .filter(|provider| slots.iter().any(|s| s.provider == *provider && s.has_client))
            .filter(|provider| !(*provider == self.primary && self.primary_backoff.is_active()))
            .filter(|provider| rate_limits.is_available(provider.as_str()))
            .collect()
    }
}
