use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config;
use crate::core::retry::{retry, RetryConfig};
use crate::generation::error::ProviderError;
use crate::generation::job::GenerationJob;
use crate::generation::limits::ConcurrencyLimiter;
use crate::storage::model_cache::ActiveModelDescriptor;

/// One submission to the inference provider, assembled from the job and
/// the resolved model descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest {
    /// Provider-side model identifier; `None` for base-model generations
    pub model_id: Option<String>,
    pub prompt: String,
    pub aspect_ratio: String,
    pub num_outputs: u32,
    pub kind: String,
}

impl InferenceRequest {
    /// Builds the provider request for a job. For avatar jobs the model's
    /// trigger phrase is prefixed onto the prompt so the trained subject
    /// appears in the output.
    pub fn for_job(job: &GenerationJob, model: Option<&ActiveModelDescriptor>) -> Self {
        let prompt = match model {
            Some(m) if !m.trigger_phrase.is_empty() => format!("{}, {}", m.trigger_phrase, job.prompt),
            _ => job.prompt.clone(),
        };
        Self {
            model_id: model.map(|m| m.model_id.clone()),
            prompt,
            aspect_ratio: job.aspect_ratio.as_str().to_string(),
            num_outputs: job.outputs,
            kind: job.kind.as_str().to_string(),
        }
    }
}

/// The external generation API, reduced to the single operation the
/// pipeline depends on. Production talks HTTP; tests script failures.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Submits one generation and returns the produced artifact URLs.
    async fn submit(&self, request: &InferenceRequest) -> Result<Vec<String>, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    output: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: Option<String>,
}

/// HTTP implementation of [`InferenceProvider`].
pub struct HttpInferenceProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpInferenceProvider {
    /// Creates a provider client against the configured endpoint.
    pub fn from_config() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config::network::provider_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config::INFERENCE_API_URL.clone(),
            api_key: config::INFERENCE_API_KEY.clone(),
        })
    }
}

#[async_trait]
impl InferenceProvider for HttpInferenceProvider {
    async fn submit(&self, request: &InferenceRequest) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/v1/generations", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_in = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(5));
            return Err(ProviderError::RateLimited { retry_in });
        }
        if status.is_server_error() {
            return Err(ProviderError::Overloaded(format!("provider returned {}", status)));
        }
        if status.is_client_error() {
            let reason = response
                .json::<ProviderErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_else(|| format!("provider returned {}", status));
            return Err(ProviderError::InvalidInput(reason));
        }

        let body: GenerationResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::UnexpectedResponse(e.to_string()))?;
        if body.output.is_empty() {
            return Err(ProviderError::UnexpectedResponse("provider returned no artifacts".to_string()));
        }
        Ok(body.output)
    }
}

/// Wraps the provider with the in-flight-calls cap and bounded
/// exponential-backoff retry on transient errors.
///
/// From the job's perspective `run` is a single suspending call; all
/// retries happen inside it.
pub struct InferenceClient {
    provider: Arc<dyn InferenceProvider>,
    limits: Arc<ConcurrencyLimiter>,
    retry_config: RetryConfig,
}

impl InferenceClient {
    pub fn new(provider: Arc<dyn InferenceProvider>, limits: Arc<ConcurrencyLimiter>, retry_config: RetryConfig) -> Self {
        Self {
            provider,
            limits,
            retry_config,
        }
    }

    /// Runs one generation, holding a provider-call permit for the whole
    /// attempt sequence.
    ///
    /// # Errors
    ///
    /// Returns the last `ProviderError` once retries are exhausted, or
    /// immediately for non-transient failures (malformed input).
    pub async fn run(&self, request: &InferenceRequest) -> Result<Vec<String>, ProviderError> {
        let _permit = self
            .limits
            .acquire_provider_call()
            .await
            .map_err(|e| ProviderError::Overloaded(format!("provider permit unavailable: {}", e)))?;

        let outcome = retry(&self.retry_config, || self.provider.submit(request)).await;
        if outcome.attempts > 1 {
            log::info!(
                "Provider call finished after {} attempts in {:?}",
                outcome.attempts,
                outcome.total_duration
            );
        }
        outcome.result.map_err(|e| e.into_last_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        calls: AtomicU32,
        failures_before_success: u32,
        transient: bool,
    }

    #[async_trait]
    impl InferenceProvider for ScriptedProvider {
        async fn submit(&self, _request: &InferenceRequest) -> Result<Vec<String>, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                if self.transient {
                    Err(ProviderError::Overloaded("simulated overload".into()))
                } else {
                    Err(ProviderError::InvalidInput("simulated bad prompt".into()))
                }
            } else {
                Ok(vec!["https://files.example/a.png".into()])
            }
        }
    }

    fn request() -> InferenceRequest {
        InferenceRequest {
            model_id: None,
            prompt: "a lighthouse at dusk".into(),
            aspect_ratio: "1:1".into(),
            num_outputs: 1,
            kind: "reference_image".into(),
        }
    }

    fn client(provider: Arc<ScriptedProvider>) -> InferenceClient {
        let limits = Arc::new(ConcurrencyLimiter::new(4, 2, 2));
        let retry = RetryConfig::provider()
            .max_retries(3)
            .initial_delay(Duration::from_millis(5))
            .no_jitter();
        InferenceClient::new(provider, limits, retry)
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_to_success() {
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicU32::new(0),
            failures_before_success: 2,
            transient: true,
        });
        let urls = client(provider.clone()).run(&request()).await.unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_retry_budget() {
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicU32::new(0),
            failures_before_success: u32::MAX,
            transient: true,
        });
        let err = client(provider.clone()).run(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Overloaded(_)));
        // 1 initial + 3 retries
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_invalid_input_is_not_retried() {
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicU32::new(0),
            failures_before_success: u32::MAX,
            transient: false,
        });
        let err = client(provider.clone()).run(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_trigger_phrase_prefixes_prompt() {
        let job = GenerationJob::build(
            1,
            1,
            crate::generation::job::JobKind::AvatarImage,
            "portrait in oil paint".into(),
            crate::generation::job::AspectRatio::Portrait,
            1,
            false,
        )
        .unwrap();
        let model = ActiveModelDescriptor {
            model_id: "mdl_1".into(),
            version: 3,
            trigger_phrase: "TOK person".into(),
            status: crate::storage::model_cache::ModelStatus::Ready,
        };

        let request = InferenceRequest::for_job(&job, Some(&model));
        assert_eq!(request.model_id.as_deref(), Some("mdl_1"));
        assert!(request.prompt.starts_with("TOK person, "));
        assert_eq!(request.aspect_ratio, "9:16");
    }
}
