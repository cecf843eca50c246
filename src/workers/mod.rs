//! Outbound worker contracts (§6): the narrow traits every inference
//! backend or external provider implements. This crate ships deterministic
//! mocks only — concrete backends (a local GGUF runtime, a hosted API
//! client, a search provider's HTTP client) are external collaborators.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::state::{Citation, SearchResult};

/// A single generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Full prompt text, already assembled from conversation history.
    pub prompt: String,
    /// Sampling / decoding parameters, backend-specific.
    pub params: HashMap<String, serde_json::Value>,
}

/// A completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Generated text.
    pub text: String,
    /// Input token count, as reported by the backend.
    pub tokens_in: u32,
    /// Output token count, as reported by the backend.
    pub tokens_out: u32,
}

/// A text generation backend: a locally-resident model or a remote API.
/// Implementations must respect cancellation of their future (the executor
/// wraps every call in [`tokio::time::timeout`]) but are not required to
/// implement their own internal timeout.
#[async_trait]
pub trait InferenceWorker: Send + Sync {
    /// Generate a completion for `request`.
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse>;

    /// Make this worker resident (load weights / warm a connection pool).
    /// Called by the model manager's admission controller; implementations
    /// backing a remote API can treat this as a no-op health check.
    async fn load(&self) -> Result<()> {
        Ok(())
    }

    /// Release residency (free weights / close pooled connections).
    async fn unload(&self) -> Result<()> {
        Ok(())
    }

    /// Cheap liveness probe used by [`crate::registry::ProbeTask`].
    async fn probe(&self) -> bool {
        true
    }
}

/// A web search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Search query text.
    pub query: String,
    /// Maximum results requested.
    pub max_results: usize,
}

/// A search provider (e.g. a hosted web search API).
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run a search, returning up to `request.max_results` results ordered
    /// by the provider's own relevance ranking.
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>>;
}

/// A page-content scraper, used by `content_enhancer` to replace a
/// provider's snippet with full extracted text.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Fetch and extract the main textual content of `url`. Returns `None`
    /// (rather than an error) when extraction yields nothing useful, so
    /// callers can fall back to the original snippet.
    async fn scrape(&self, url: &str) -> Result<Option<String>>;
}

/// Deterministic [`InferenceWorker`] used by tests and as the default
/// worker behind a fresh `model_assignments` entry with no real backend
/// wired in yet.
pub struct MockInferenceWorker {
    /// Text returned verbatim regardless of prompt.
    pub canned_response: String,
    /// Artificial latency, to exercise timeout/retry paths deterministically.
    pub latency: Duration,
    /// Forces every call to fail, to exercise error-handling paths.
    pub always_fails: bool,
}

impl MockInferenceWorker {
    /// A worker that answers instantly with `text`.
    #[must_use]
    pub fn canned(text: impl Into<String>) -> Self {
        Self {
            canned_response: text.into(),
            latency: Duration::ZERO,
            always_fails: false,
        }
    }

    /// A worker that always fails with [`crate::Error::WorkerTimeout`]-class
    /// errors, for exercising retry/fallback logic.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            canned_response: String::new(),
            latency: Duration::ZERO,
            always_fails: true,
        }
    }
}

#[async_trait]
impl InferenceWorker for MockInferenceWorker {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.always_fails {
            return Err(crate::Error::Unknown("mock worker configured to fail".to_string()));
        }
        Ok(GenerateResponse {
            text: self.canned_response.clone(),
            tokens_in: (request.prompt.len() / 4).max(1) as u32,
            tokens_out: (self.canned_response.len() / 4).max(1) as u32,
        })
    }

    async fn probe(&self) -> bool {
        !self.always_fails
    }
}

/// Deterministic [`SearchProvider`] returning a fixed result set.
pub struct MockSearchProvider {
    results: Vec<SearchResult>,
}

impl MockSearchProvider {
    /// Build a provider that always returns `results`, truncated to the
    /// caller's `max_results`.
    #[must_use]
    pub fn with_results(results: Vec<SearchResult>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>> {
        Ok(self.results.iter().take(request.max_results).cloned().collect())
    }
}

/// Deterministic [`Scraper`] that appends a marker to prove enhancement ran.
pub struct MockScraper;

#[async_trait]
impl Scraper for MockScraper {
    async fn scrape(&self, url: &str) -> Result<Option<String>> {
        Ok(Some(format!("[enhanced content for {url}]")))
    }
}

/// Build a [`Citation`] list from a result set, the shared helper used by
/// `synthesiser`.
#[must_use]
pub fn citations_from(results: &[SearchResult]) -> Vec<Citation> {
    results
        .iter()
        .map(|r| Citation {
            title: r.title.clone(),
            url: r.url.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_inference_worker_echoes_canned_response() {
        let worker = MockInferenceWorker::canned("hello there");
        let resp = worker
            .generate(GenerateRequest {
                prompt: "hi".to_string(),
                params: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(resp.text, "hello there");
    }

    #[tokio::test]
    async fn failing_mock_worker_errors() {
        let worker = MockInferenceWorker::failing();
        let result = worker
            .generate(GenerateRequest {
                prompt: "hi".to_string(),
                params: HashMap::new(),
            })
            .await;
        assert!(result.is_err());
        assert!(!worker.probe().await);
    }

    #[tokio::test]
    async fn mock_search_provider_truncates_to_max_results() {
        let provider = MockSearchProvider::with_results(vec![
            SearchResult {
                title: "a".into(),
                url: "https://a".into(),
                snippet: "".into(),
                relevance_score: 1.0,
                enhanced: false,
            },
            SearchResult {
                title: "b".into(),
                url: "https://b".into(),
                snippet: "".into(),
                relevance_score: 0.9,
                enhanced: false,
            },
        ]);
        let results = provider
            .search(SearchRequest {
                query: "q".into(),
                max_results: 1,
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }
}
