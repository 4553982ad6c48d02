//! Streaming engine (C15): multi-attempt provider streaming with
//! pre-first-token failover.
//!
//! Grounded in the teacher's `llm::simple_external::SimpleExternalProvider
//! ::openai_stream` for the SSE-parse-loop-into-channel idiom, generalized
//! from a single fixed provider into the ordered `ProviderRouter` fallback
//! chain described in §4.13.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::provider_router::{FailureSignal, Provider, ProviderRouter, ProviderSlot};
use crate::rate_limit::{resolve_rate_limit_reset, RateLimitStore};
use crate::request_factory::RequestFactory;

/// Structured failover/terminal notice, per §4.13 step 3.
#[derive(Debug, Clone)]
pub struct StreamNotice {
    pub code: String,
    pub summary: String,
    pub diagnostic_context: String,
    pub retryable: bool,
    pub provider: Provider,
    pub stage: &'static str,
    pub attempt: usize,
    pub max_attempts: usize,
}

/// One item on the output channel, per the design notes' `StreamChunk`
/// sum type.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    Notice(StreamNotice),
    End,
    Error(String),
}

/// A provider's streaming transport. Implementations spawn their own
/// background task and return a receiver immediately; a `FailureSignal` on
/// the channel represents a failure observed mid-stream (connection error,
/// non-2xx status, malformed SSE frame, …), classified by the caller.
#[async_trait::async_trait]
pub trait StreamingProvider: Send + Sync {
    fn provider(&self) -> Provider;
    async fn open_stream(&self, model: &str, prompt: &str, temperature: Option<f32>) -> mpsc::Receiver<Result<String, FailureSignal>>;
}

/// An OpenAI-compatible chat-completions SSE client, usable for any
/// provider speaking the same wire format (GitHub Models, OpenAI itself,
/// and most self-hosted `/v1/chat/completions` servers).
///
/// Grounded in the teacher's `llm::simple_external::SimpleExternalProvider
/// ::openai_stream`: post with `"stream": true`, read `response.bytes_stream()`
/// line by line, and forward each `data: {...}` frame's
/// `choices[0].delta.content`, stopping at `data: [DONE]`.
pub struct OpenAiCompatibleStreamingProvider {
    provider: Provider,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleStreamingProvider {
    pub fn new(provider: Provider, endpoint: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self { provider, endpoint, api_key, client }
    }
}

#[async_trait::async_trait]
impl StreamingProvider for OpenAiCompatibleStreamingProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn open_stream(&self, model: &str, prompt: &str, temperature: Option<f32>) -> mpsc::Receiver<Result<String, FailureSignal>> {
        let (tx, rx) = mpsc::channel(256);
        let request = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": temperature,
            "stream": true,
        });

        let send = self.client.post(&self.endpoint).header("Authorization", format!("Bearer {}", self.api_key)).json(&request).send();
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            let response = match send.await {
                Ok(r) => r,
                Err(e) => {
                    let signal = FailureSignal {
                        is_io_error: !e.is_timeout(),
                        is_interrupted: e.is_timeout(),
                        message: format!("connecting to {endpoint}: {e}"),
                        ..Default::default()
                    };
                    let _ = tx.send(Err(signal)).await;
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let header = |name: &str| response.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
                let signal = FailureSignal {
                    status_code: Some(status.as_u16()),
                    message: format!("{endpoint} returned HTTP {status}"),
                    retry_after: if status == reqwest::StatusCode::TOO_MANY_REQUESTS { header("retry-after") } else { None },
                    x_rate_limit_reset: if status == reqwest::StatusCode::TOO_MANY_REQUESTS { header("x-ratelimit-reset") } else { None },
                    ..Default::default()
                };
                let _ = tx.send(Err(signal)).await;
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk: Bytes = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        let signal = FailureSignal { is_sse_error: true, message: format!("stream read error: {e}"), ..Default::default() };
                        let _ = tx.send(Err(signal)).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || !line.starts_with("data: ") {
                        continue;
                    }
                    let data = &line[6..];
                    if data == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<serde_json::Value>(data) {
                        Ok(parsed) => {
                            if let Some(content) = parsed["choices"][0]["delta"]["content"].as_str() {
                                if !content.is_empty() && tx.send(Ok(content.to_string())).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let signal = FailureSignal { is_sse_error: true, message: format!("malformed SSE frame: {e}"), ..Default::default() };
                            if tx.send(Err(signal)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        rx
    }
}

pub struct StreamingEngine {
    router: Arc<ProviderRouter>,
    rate_limits: Arc<RateLimitStore>,
    request_factory: Arc<RequestFactory>,
    providers: Vec<Arc<dyn StreamingProvider>>,
    model_for: std::collections::HashMap<Provider, String>,
}

impl StreamingEngine {
    pub fn new(
        router: Arc<ProviderRouter>,
        rate_limits: Arc<RateLimitStore>,
        request_factory: Arc<RequestFactory>,
        providers: Vec<Arc<dyn StreamingProvider>>,
        model_for: std::collections::HashMap<Provider, String>,
    ) -> Self {
        Self { router, rate_limits, request_factory, providers, model_for }
    }

    fn slots(&self) -> Vec<ProviderSlot> {
        self.providers.iter().map(|p| ProviderSlot { provider: p.provider(), has_client: true }).collect()
    }

    fn provider_client(&self, provider: Provider) -> Option<Arc<dyn StreamingProvider>> {
        self.providers.iter().find(|p| p.provider() == provider).cloned()
    }

    /// Runs §4.13's algorithm and returns a channel the caller reads
    /// `StreamChunk`s from until `End`/`Error`.
    pub fn stream(&self, prompt: String, temperature: f32, cancel: CancellationToken) -> mpsc::Receiver<StreamChunk> {
        let (tx, rx) = mpsc::channel(256);

        let available = self.router.select_available(&self.slots(), &self.rate_limits);
        if available.is_empty() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(StreamChunk::Error("all providers unavailable".to_string())).await;
                let _ = tx.send(StreamChunk::End).await;
            });
            return rx;
        }

        let router = Arc::clone(&self.router);
        let rate_limits = Arc::clone(&self.rate_limits);
        let request_factory = Arc::clone(&self.request_factory);
        let model_for = self.model_for.clone();
        let clients: Vec<Arc<dyn StreamingProvider>> = available
            .iter()
            .filter_map(|p| self.provider_client(*p))
            .collect();
        let max_attempts = clients.len();

        tokio::spawn(async move {
            run_stream(clients, model_for, router, rate_limits, request_factory, prompt, temperature, max_attempts, cancel, tx).await;
        });

        rx
    }
}

/// Records a provider failure in the persistent rate-limit store. A 429
/// carrying `Retry-After`/`X-RateLimit-Reset` is recorded against the
/// header-derived reset time per §4.14; every other backoff-eligible
/// failure falls back to the generic consecutive-failure backoff.
fn record_provider_failure(rate_limits: &RateLimitStore, provider: &str, signal: &FailureSignal) {
    if signal.status_code == Some(429) {
        if let Ok(reset) = resolve_rate_limit_reset(signal.retry_after.as_deref(), signal.x_rate_limit_reset.as_deref()) {
            rate_limits.record_rate_limit(provider, Some(reset), "0");
            return;
        }
    }
    rate_limits.record_failure(provider);
}

#[allow(clippy::too_many_arguments)]
async fn run_stream(
    clients: Vec<Arc<dyn StreamingProvider>>,
    model_for: std::collections::HashMap<Provider, String>,
    router: Arc<ProviderRouter>,
    rate_limits: Arc<RateLimitStore>,
    request_factory: Arc<RequestFactory>,
    prompt: String,
    temperature: f32,
    max_attempts: usize,
    cancel: CancellationToken,
    tx: mpsc::Sender<StreamChunk>,
) {
    for (attempt_idx, client) in clients.iter().enumerate() {
        let provider = client.provider();
        let attempt = attempt_idx + 1;
        let model = model_for.get(&provider).cloned().unwrap_or_else(|| provider.as_str().to_string());
        let request = request_factory.build(&model, &prompt, temperature);

        let mut receiver = client.open_stream(&request.model, &request.prompt, request.temperature).await;
        let mut first_token_emitted = false;

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(provider = provider.as_str(), "stream cancelled");
                    return;
                }
                item = receiver.recv() => item,
            };

            match item {
                Some(Ok(text)) => {
                    first_token_emitted = true;
                    if tx.send(StreamChunk::Text(text)).await.is_err() {
                        return;
                    }
                }
                Some(Err(signal)) => {
                    router.note_primary_failure(&signal);
                    if signal.is_backoff_primary() {
                        record_provider_failure(&rate_limits, provider.as_str(), &signal);
                    }

                    if !first_token_emitted && signal.is_streaming_fallback_eligible() && attempt < max_attempts {
                        let notice = StreamNotice {
                            code: "provider_switch".to_string(),
                            summary: format!("switching away from {} after a pre-first-token failure", provider.as_str()),
                            diagnostic_context: signal.message.clone(),
                            retryable: true,
                            provider,
                            stage: "stream",
                            attempt,
                            max_attempts,
                        };
                        warn!(provider = provider.as_str(), attempt, max_attempts, "pre-first-token failover");
                        if tx.send(StreamChunk::Notice(notice)).await.is_err() {
                            return;
                        }
                        break; // try the next client
                    }

                    let _ = tx.send(StreamChunk::Error(signal.message.clone())).await;
                    let _ = tx.send(StreamChunk::End).await;
                    return;
                }
                None => {
                    rate_limits.record_success(provider.as_str());
                    let _ = tx.send(StreamChunk::End).await;
                    return;
                }
            }
        }
    }

    let _ = tx.send(StreamChunk::Error("all providers unavailable".to_string())).await;
    let _ = tx.send(StreamChunk::End).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        provider: Provider,
        script: Vec<Result<&'static str, FailureSignal>>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl StreamingProvider for ScriptedProvider {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn open_stream(&self, _model: &str, _prompt: &str, _temperature: Option<f32>) -> mpsc::Receiver<Result<String, FailureSignal>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            let script = self.script.clone();
            tokio::spawn(async move {
                for item in script {
                    let _ = tx.send(item.map(|s| s.to_string())).await;
                }
            });
            rx
        }
    }

    fn router() -> Arc<ProviderRouter> {
        Arc::new(ProviderRouter::new(Provider::GithubModels, Provider::OpenAI, 600))
    }

    fn rate_limits() -> Arc<RateLimitStore> {
        Arc::new(RateLimitStore::load(std::env::temp_dir().join(format!("ragcore-stream-{}.json", uuid::Uuid::new_v4()))))
    }

    fn factory() -> Arc<RequestFactory> {
        Arc::new(RequestFactory::new(None, 4000))
    }

    async fn drain(mut rx: mpsc::Receiver<StreamChunk>) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            let is_end = matches!(chunk, StreamChunk::End);
            out.push(chunk);
            if is_end {
                break;
            }
        }
        out
    }

    #[tokio::test]
    async fn successful_stream_forwards_text_then_end() {
        let provider_a = Arc::new(ScriptedProvider {
            provider: Provider::GithubModels,
            script: vec![Ok("Hi"), Ok(".")],
            calls: AtomicUsize::new(0),
        });
        let mut model_for = std::collections::HashMap::new();
        model_for.insert(Provider::GithubModels, "gpt-4o".to_string());

        let engine = StreamingEngine::new(router(), rate_limits(), factory(), vec![provider_a], model_for);
        let rx = engine.stream("hello".to_string(), 0.5, CancellationToken::new());
        let chunks = drain(rx).await;

        assert!(matches!(chunks[0], StreamChunk::Text(ref s) if s == "Hi"));
        assert!(matches!(chunks[1], StreamChunk::Text(ref s) if s == "."));
        assert!(matches!(chunks.last().unwrap(), StreamChunk::End));
    }

    #[tokio::test]
    async fn pre_first_token_failure_switches_providers() {
        // Scenario 5: provider A fails 503 before any delta; provider B streams "Hi", ".".
        let provider_a = Arc::new(ScriptedProvider {
            provider: Provider::GithubModels,
            script: vec![Err(FailureSignal { status_code: Some(503), message: "server error".to_string(), ..Default::default() })],
            calls: AtomicUsize::new(0),
        });
        let provider_b = Arc::new(ScriptedProvider {
            provider: Provider::OpenAI,
            script: vec![Ok("Hi"), Ok(".")],
            calls: AtomicUsize::new(0),
        });

        let mut model_for = std::collections::HashMap::new();
        model_for.insert(Provider::GithubModels, "gpt-4o".to_string());
        model_for.insert(Provider::OpenAI, "gpt-4o-mini".to_string());

        let engine = StreamingEngine::new(router(), rate_limits(), factory(), vec![provider_a, provider_b], model_for);
        let rx = engine.stream("hello".to_string(), 0.5, CancellationToken::new());
        let chunks = drain(rx).await;

        let notices: Vec<_> = chunks.iter().filter(|c| matches!(c, StreamChunk::Notice(_))).collect();
        assert_eq!(notices.len(), 1);
        if let StreamChunk::Notice(n) = notices[0] {
            assert_eq!(n.attempt, 1);
            assert_eq!(n.max_attempts, 2);
            assert_eq!(n.stage, "stream");
            assert!(n.retryable);
        }

        let texts: Vec<&str> = chunks
            .iter()
            .filter_map(|c| if let StreamChunk::Text(s) = c { Some(s.as_str()) } else { None })
            .collect();
        assert_eq!(texts, vec!["Hi", "."]);
    }

    #[tokio::test]
    async fn failure_after_first_token_is_terminal() {
        let provider_a = Arc::new(ScriptedProvider {
            provider: Provider::GithubModels,
            script: vec![
                Ok("Hi"),
                Err(FailureSignal { is_sse_error: true, message: "stream dropped".to_string(), ..Default::default() }),
            ],
            calls: AtomicUsize::new(0),
        });
        let provider_b = Arc::new(ScriptedProvider {
            provider: Provider::OpenAI,
            script: vec![Ok("should not run")],
            calls: AtomicUsize::new(0),
        });

        let mut model_for = std::collections::HashMap::new();
        model_for.insert(Provider::GithubModels, "gpt-4o".to_string());
        model_for.insert(Provider::OpenAI, "gpt-4o-mini".to_string());

        let engine = StreamingEngine::new(router(), rate_limits(), factory(), vec![provider_a, provider_b.clone()], model_for);
        let rx = engine.stream("hello".to_string(), 0.5, CancellationToken::new());
        let chunks = drain(rx).await;

        assert!(chunks.iter().any(|c| matches!(c, StreamChunk::Error(_))));
        assert_eq!(provider_b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_available_providers_fails_immediately() {
        let engine = StreamingEngine::new(router(), rate_limits(), factory(), vec![], std::collections::HashMap::new());
        let rx = engine.stream("hello".to_string(), 0.5, CancellationToken::new());
        let chunks = drain(rx).await;
        assert!(matches!(chunks[0], StreamChunk::Error(ref s) if s.contains("all providers unavailable")));
    }

    #[tokio::test]
    async fn rate_limit_429_with_retry_after_is_recorded_from_the_header() {
        let signal = FailureSignal {
            status_code: Some(429),
            retry_after: Some("30".to_string()),
            message: "rate limited".to_string(),
            ..Default::default()
        };
        let limits = rate_limits();
        record_provider_failure(&limits, "github_models", &signal);

        let state = limits.state("github_models");
        assert_eq!(state.consecutive_failures, 1);
        let until = state.rate_limited_until.expect("rate-limited deadline recorded");
        let now = chrono::Utc::now();
        assert!(until > now && until <= now + chrono::Duration::seconds(31));
    }

    #[tokio::test]
    async fn non_rate_limit_failure_falls_back_to_generic_backoff() {
        let signal = FailureSignal { status_code: Some(503), message: "server error".to_string(), ..Default::default() };
        let limits = rate_limits();
        record_provider_failure(&limits, "github_models", &signal);

        let state = limits.state("github_models");
        let until = state.rate_limited_until.expect("backoff deadline recorded");
        assert!(until > chrono::Utc::now() + chrono::Duration::minutes(59));
    }
}
