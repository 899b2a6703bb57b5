//! Client for an OpenAI-compatible chat-completions endpoint.
//!
//! Every request carries a strict JSON schema (see [`schema`]) and goes
//! through [`RetryPolicy`]. Non-success statuses are classified once, here:
//! HTTP 429 always becomes [`LlmError::RateLimited`]; 500/502/503 are retried
//! unless their error envelope reports a rate limit on a non-pro key.

pub mod retry;
pub mod schema;
pub mod wire;

use crate::error::LlmError;
use crate::mapper::{
    map_analysis, map_merge_message, MappedAnalysis, MappingContext, MergeSuggestion,
};
use crate::prompt::{
    build_merge_message_prompt, MergeMessageRequest, ANALYSIS_SYSTEM_PROMPT, MERGE_SYSTEM_PROMPT,
};
use crate::types::{ApiKey, Tier};
use async_trait::async_trait;
use reqwest::header;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub use retry::RetryPolicy;
pub use wire::TokenUsage;
use wire::{error_message, ChatRequest, ChatResponse, ResponseFormat};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Suggested wait after a rate-limit response.
pub const RATE_LIMIT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Fixed client settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub retry: RetryPolicy,
    /// Per-attempt HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.2,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// A prompt plus what the mapper needs to interpret the answer.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub prompt: String,
    pub mapping: MappingContext,
}

#[derive(Debug, Clone)]
pub struct AnalysisResponse {
    pub analysis: MappedAnalysis,
    pub usage: TokenUsage,
    pub model: String,
    pub response_id: String,
}

#[derive(Debug, Clone)]
pub struct MergeMessageResponse {
    pub suggestion: MergeSuggestion,
    pub usage: TokenUsage,
    pub model: String,
}

/// The model-facing port of the pipeline.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, LlmError>;

    async fn generate_merge_message(
        &self,
        request: &MergeMessageRequest,
    ) -> Result<MergeMessageResponse, LlmError>;
}

#[derive(Debug)]
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
    tier: Tier,
    max_tokens: u32,
    url_chat: String,
}

impl LlmClient {
    /// Builds a client for `key`.
    ///
    /// # Errors
    /// - [`LlmError::MissingApiKey`] if the secret is empty
    /// - [`LlmError::InvalidEndpoint`] unless `base_url` is http(s)
    /// - [`LlmError::InvalidApiKey`] if the key cannot be sent as a header
    pub fn new(config: LlmConfig, key: &ApiKey) -> Result<LlmClient, LlmError> {
        if key.secret().trim().is_empty() {
            return Err(LlmError::MissingApiKey(key.provider().to_string()));
        }

        let base = config.base_url.trim().trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(LlmError::InvalidEndpoint(config.base_url.clone()));
        }

        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", key.secret().trim()))
            .map_err(|_| LlmError::InvalidApiKey)?;
        auth.set_sensitive(true);
        let mut headers = header::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()?;

        let url_chat = format!("{base}/chat/completions");
        info!(
            model = %config.model,
            endpoint = %base,
            tier = %key.tier(),
            key = %key.prefix(),
            max_attempts = config.retry.max_attempts,
            "LLM client initialized"
        );

        Ok(LlmClient {
            http,
            tier: key.tier(),
            max_tokens: key.max_tokens_per_request(),
            config,
            url_chat,
        })
    }

    fn request(&self, system: &str, prompt: &str, format: ResponseFormat) -> ChatRequest {
        ChatRequest::new(
            &self.config.model,
            system,
            prompt,
            format,
            self.max_tokens,
            self.config.temperature,
        )
    }

    /// Sends `body` with retries.
    async fn complete(&self, body: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.config
            .retry
            .run(|attempt| self.complete_once(body, attempt))
            .await
    }

    async fn complete_once(
        &self,
        body: &ChatRequest,
        attempt: u32,
    ) -> Result<ChatResponse, LlmError> {
        let started = Instant::now();
        debug!(
            attempt,
            model = %self.config.model,
            prompt_len = body.messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "POST {}", self.url_chat
        );

        let resp = self.http.post(&self.url_chat).json(body).send().await?;
        let status = resp.status();
        let text = resp.text().await.map_err(LlmError::Body)?;

        if !status.is_success() {
            let err = classify_failure(status.as_u16(), &text, self.tier);
            error!(
                %status,
                attempt,
                latency_ms = started.elapsed().as_millis(),
                error = %err,
                "chat completion returned non-success status"
            );
            return Err(err);
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(crate::error::ResponseError::from)?;
        debug!(
            latency_ms = started.elapsed().as_millis(),
            total_tokens = parsed.usage.total_tokens,
            "chat completion received"
        );
        Ok(parsed)
    }
}

/// Maps a non-success response to an error. Decides rate limiting structurally.
pub(crate) fn classify_failure(status: u16, body: &str, tier: Tier) -> LlmError {
    let message = error_message(body);
    let mentions_rate_limit = {
        let lower = message.to_ascii_lowercase();
        lower.contains("rate limit") || lower.contains("rate_limit")
    };
    match status {
        429 => LlmError::RateLimited {
            message,
            retry_after: RATE_LIMIT_RETRY_AFTER,
        },
        500 | 502 | 503 if mentions_rate_limit && tier != Tier::Pro => LlmError::RateLimited {
            message,
            retry_after: RATE_LIMIT_RETRY_AFTER,
        },
        _ => LlmError::Http { status, message },
    }
}

#[async_trait]
impl Analyzer for LlmClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, LlmError> {
        let body = self.request(ANALYSIS_SYSTEM_PROMPT, &request.prompt, schema::analysis_format());
        let response = self.complete(&body).await?;
        let analysis = map_analysis(response.first_content()?, &request.mapping)?;

        info!(
            action = %analysis.decision.action(),
            confidence = analysis.decision.confidence().value(),
            dropped_alternatives = analysis.dropped_alternatives,
            total_tokens = response.usage.total_tokens,
            model = %response.model,
            "analysis completed"
        );

        Ok(AnalysisResponse {
            analysis,
            usage: response.usage,
            model: response.model,
            response_id: response.id,
        })
    }

    async fn generate_merge_message(
        &self,
        request: &MergeMessageRequest,
    ) -> Result<MergeMessageResponse, LlmError> {
        let prompt = build_merge_message_prompt(request);
        let body = self.request(MERGE_SYSTEM_PROMPT, &prompt, schema::merge_message_format());
        let response = self.complete(&body).await?;
        let suggestion = map_merge_message(response.first_content()?, request.default_strategy)?;

        info!(
            strategy = %suggestion.strategy,
            total_tokens = response.usage.total_tokens,
            "merge message generated"
        );

        Ok(MergeMessageResponse {
            suggestion,
            usage: response.usage,
            model: response.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(secret: &str) -> ApiKey {
        ApiKey::new(secret, "openai", Tier::Free)
    }

    #[test]
    fn test_client_validation() {
        let err = LlmClient::new(LlmConfig::default(), &key("  ")).unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey(p) if p == "openai"));

        let config = LlmConfig {
            base_url: "ftp://example.com".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            LlmClient::new(config, &key("sk-test")).unwrap_err(),
            LlmError::InvalidEndpoint(_)
        ));

        assert!(matches!(
            LlmClient::new(LlmConfig::default(), &key("sk-\nbad")).unwrap_err(),
            LlmError::InvalidApiKey
        ));

        assert!(LlmClient::new(LlmConfig::default(), &key("sk-test")).is_ok());
    }

    #[test]
    fn test_429_is_always_rate_limited() {
        for tier in [Tier::Free, Tier::Pro, Tier::Unknown] {
            let err = classify_failure(429, "{}", tier);
            match err {
                LlmError::RateLimited { retry_after, .. } => {
                    assert_eq!(retry_after, Duration::from_secs(60))
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_rate_limit_in_5xx_depends_on_tier() {
        let body = r#"{"error":{"message":"Rate limit exceeded, try later","type":"server"}}"#;
        assert!(classify_failure(503, body, Tier::Free).is_rate_limited());
        assert!(classify_failure(503, body, Tier::Unknown).is_rate_limited());

        let err = classify_failure(503, body, Tier::Pro);
        assert!(err.is_retryable());
        assert!(matches!(err, LlmError::Http { status: 503, .. }));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_failure(500, "oops", Tier::Free).is_retryable());
        assert!(classify_failure(502, "", Tier::Free).is_retryable());
        assert!(!classify_failure(504, "", Tier::Free).is_retryable());
        let bad_key = r#"{"error":{"message":"bad key"}}"#;
        assert!(!classify_failure(401, bad_key, Tier::Free).is_retryable());
        match classify_failure(401, bad_key, Tier::Free) {
            LlmError::Http { message, .. } => assert_eq!(message, "bad key"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
