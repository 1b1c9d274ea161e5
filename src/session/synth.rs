//! Synthesis collaborator: requests more candidates for a chunk.
//!
//! This is the only network-bound dependency of the engine, so every call
//! goes through [`synthesize_with_retry`] with exponential backoff.

use crate::error::{Result, TakepickError};
use crate::model::Candidate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Ask for `count` new renderings of one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub session: String,
    pub chunk_index: u32,
    pub text: String,
    pub count: u32,
    /// Version number the first returned candidate should carry.
    pub first_version: u32,
}

/// Trait for synthesis backends.
///
/// Errors must be `TakepickError::Synthesis` with `transient` set when a
/// retry may succeed (timeouts, overload, connection resets).
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<Candidate>>;

    fn name(&self) -> &str;
}

/// Backoff schedule for transient synthesis failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::defaults::SYNTH_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based: the delay after the first failure is `delay(1)`).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let secs = self.initial_backoff.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Call the synthesizer, retrying transient failures with exponential backoff.
///
/// Permanent failures return immediately. After `max_attempts` transient
/// failures the last error is returned.
pub async fn synthesize_with_retry(
    synthesizer: &dyn Synthesizer,
    request: &SynthesisRequest,
    policy: &RetryPolicy,
) -> Result<Vec<Candidate>> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match synthesizer.synthesize(request).await {
            Ok(candidates) => {
                if attempt > 1 {
                    tracing::info!(
                        chunk = request.chunk_index,
                        attempt,
                        "synthesis succeeded after retry"
                    );
                }
                return Ok(candidates);
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let backoff = policy.delay(attempt);
                tracing::warn!(
                    chunk = request.chunk_index,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "transient synthesis failure, will retry"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                tracing::error!(
                    chunk = request.chunk_index,
                    attempt,
                    error = %err,
                    "synthesis failed"
                );
                return Err(err);
            }
        }
    }
}

/// Offline backend: never produces candidates.
#[derive(Debug, Clone, Default)]
pub struct NullSynthesizer;

#[async_trait]
impl Synthesizer for NullSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<Candidate>> {
        tracing::debug!(chunk = request.chunk_index, "no synthesis backend configured");
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Scripted response for [`MockSynthesizer`].
#[derive(Debug, Clone)]
pub enum MockResponse {
    Candidates(Vec<Candidate>),
    Transient(String),
    Permanent(String),
}

/// Mock synthesizer for testing: replays scripted responses in order, then
/// returns empty batches.
#[derive(Debug, Default)]
pub struct MockSynthesizer {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<SynthesisRequest>>,
    calls: AtomicUsize,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, response: MockResponse) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
        self
    }

    pub fn with_candidates(self, candidates: Vec<Candidate>) -> Self {
        self.with_response(MockResponse::Candidates(candidates))
    }

    /// Number of `synthesize` calls so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            None => Ok(Vec::new()),
            Some(MockResponse::Candidates(c)) => Ok(c),
            Some(MockResponse::Transient(message)) => Err(TakepickError::Synthesis {
                message,
                transient: true,
            }),
            Some(MockResponse::Permanent(message)) => Err(TakepickError::Synthesis {
                message,
                transient: false,
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(feature = "http-synth")]
pub use http::HttpSynthesizer;

#[cfg(feature = "http-synth")]
mod http {
    use super::{SynthesisRequest, Synthesizer};
    use crate::error::{Result, TakepickError};
    use crate::model::Candidate;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    struct SynthesisResponse {
        #[serde(default)]
        candidates: Vec<Candidate>,
    }

    /// JSON-over-HTTP backend.
    ///
    /// POSTs the request to `url` and expects `{"candidates": [...]}` back.
    /// Server errors, timeouts and connection failures are transient; client
    /// errors are permanent.
    pub struct HttpSynthesizer {
        client: reqwest::Client,
        url: String,
    }

    impl HttpSynthesizer {
        pub fn new(url: &str, timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| TakepickError::Synthesis {
                    message: format!("Failed to build HTTP client: {}", e),
                    transient: false,
                })?;
            Ok(Self {
                client,
                url: url.to_string(),
            })
        }
    }

    fn classify(e: reqwest::Error) -> TakepickError {
        let transient = e.is_timeout() || e.is_connect() || e.is_request();
        TakepickError::Synthesis {
            message: e.to_string(),
            transient,
        }
    }

    #[async_trait]
    impl Synthesizer for HttpSynthesizer {
        async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<Candidate>> {
            let response = self
                .client
                .post(&self.url)
                .json(request)
                .send()
                .await
                .map_err(classify)?;

            let status = response.status();
            if !status.is_success() {
                return Err(TakepickError::Synthesis {
                    message: format!("{} returned HTTP {}", self.url, status),
                    transient: status.is_server_error() || status.as_u16() == 429,
                });
            }

            let body: SynthesisResponse = response.json().await.map_err(classify)?;
            Ok(body.candidates)
        }

        fn name(&self) -> &str {
            "http"
        }
    }
}
