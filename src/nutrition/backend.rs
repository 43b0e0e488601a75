//! HTTP completion backend for the hosted language model

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::RecoveryConfig;
use crate::errors::NutritionError;

pub const COMPLETION_URL: &str = "https://llm.api.cloud.yandex.net/foundationModels/v1/completion";

/// Sampling settings for one completion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl CompletionOptions {
    /// Low temperature, short answer: a single JSON object
    pub fn meal_breakdown() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 500,
        }
    }

    /// A whole day of meals needs a longer answer
    pub fn menu() -> Self {
        Self {
            temperature: 0.5,
            max_tokens: 2000,
        }
    }
}

/// Text-in, text-out completion service
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<String, NutritionError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest<'a> {
    model_uri: String,
    completion_options: RequestOptions,
    messages: [RequestMessage<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestOptions {
    stream: bool,
    temperature: f64,
    // The API takes the token limit as a string
    max_tokens: String,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    text: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    result: CompletionResult,
}

#[derive(Deserialize)]
struct CompletionResult {
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    message: AlternativeMessage,
}

#[derive(Deserialize)]
struct AlternativeMessage {
    text: String,
}

enum AttemptError {
    Retryable(NutritionError),
    Fatal(NutritionError),
}

/// Yandex GPT completion client with retries and a circuit breaker
pub struct YandexGptBackend {
    http: reqwest::Client,
    api_key: String,
    folder_id: String,
    recovery: RecoveryConfig,
    breaker: CircuitBreaker,
}

impl YandexGptBackend {
    pub fn new(api_key: impl Into<String>, folder_id: impl Into<String>, recovery: RecoveryConfig) -> Self {
        let breaker = CircuitBreaker::new(&recovery);
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            folder_id: folder_id.into(),
            recovery,
            breaker,
        }
    }

    fn model_uri(&self) -> String {
        format!("gpt://{}/yandexgpt-lite/latest", self.folder_id)
    }

    async fn attempt(&self, prompt: &str, options: CompletionOptions) -> Result<String, AttemptError> {
        let body = CompletionRequest {
            model_uri: self.model_uri(),
            completion_options: RequestOptions {
                stream: false,
                temperature: options.temperature,
                max_tokens: options.max_tokens.to_string(),
            },
            messages: [RequestMessage {
                role: "user",
                text: prompt,
            }],
        };

        let response = self
            .http
            .post(COMPLETION_URL)
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = NutritionError::Network(format!("completion service returned {status}: {text}"));
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(AttemptError::Retryable(err))
            } else {
                Err(AttemptError::Fatal(err))
            };
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Fatal(NutritionError::Parse(format!("unexpected envelope: {e}"))))?;

        parsed
            .result
            .alternatives
            .into_iter()
            .next()
            .map(|alternative| alternative.message.text.trim().to_string())
            .ok_or_else(|| AttemptError::Fatal(NutritionError::Parse("no alternatives returned".to_string())))
    }
}

/// Exponential backoff capped at `max_retry_delay_ms`, plus up to 25% random jitter
pub fn retry_delay(config: &RecoveryConfig, attempt: u32) -> Duration {
    let exponential = config
        .base_retry_delay_ms
        .saturating_mul(1u64 << attempt.min(16));
    let capped = exponential.min(config.max_retry_delay_ms);
    let jitter = if capped >= 4 {
        rand::thread_rng().gen_range(0..=capped / 4)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}

#[async_trait]
impl CompletionBackend for YandexGptBackend {
    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<String, NutritionError> {
        if self.breaker.is_open() {
            warn!("Circuit breaker open, skipping completion request");
            return Err(NutritionError::CircuitOpen);
        }

        let mut attempt = 0;
        loop {
            debug!(attempt, prompt_length = prompt.len(), "Sending completion request");
            match self.attempt(prompt, options).await {
                Ok(text) => {
                    self.breaker.record_success();
                    debug!(response_length = text.len(), "Completion received");
                    return Ok(text);
                }
                Err(AttemptError::Retryable(e)) if attempt < self.recovery.max_retries => {
                    let delay = retry_delay(&self.recovery, attempt);
                    warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Completion failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(AttemptError::Retryable(e)) | Err(AttemptError::Fatal(e)) => {
                    self.breaker.record_failure();
                    info!(attempts = attempt + 1, error = %e, "Completion request failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = CompletionRequest {
            model_uri: "gpt://folder/yandexgpt-lite/latest".to_string(),
            completion_options: RequestOptions {
                stream: false,
                temperature: 0.3,
                max_tokens: "500".to_string(),
            },
            messages: [RequestMessage {
                role: "user",
                text: "овсянка",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["modelUri"], "gpt://folder/yandexgpt-lite/latest");
        assert_eq!(json["completionOptions"]["maxTokens"], "500");
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_envelope() {
        let raw = r#"{"result": {"alternatives": [{"message": {"role": "assistant", "text": "{}"}, "status": "ALTERNATIVE_STATUS_FINAL"}], "modelVersion": "1"}}"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.result.alternatives[0].message.text, "{}");
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let config = RecoveryConfig {
            base_retry_delay_ms: 500,
            max_retry_delay_ms: 2000,
            ..Default::default()
        };
        let first = retry_delay(&config, 0);
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(625));

        let late = retry_delay(&config, 10);
        assert!(late >= Duration::from_millis(2000) && late <= Duration::from_millis(2500));
    }

    #[test]
    fn test_model_uri() {
        let backend = YandexGptBackend::new("key", "b1gfolder", RecoveryConfig::default());
        assert_eq!(backend.model_uri(), "gpt://b1gfolder/yandexgpt-lite/latest");
    }
}
