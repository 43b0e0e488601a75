//! # Error Types Module
//!
//! Structured error types for the external services the bot depends on and
//! for process configuration. Persistence and handler plumbing use
//! `anyhow::Result` with context instead.

use thiserror::Error;

use crate::rate_limiter::RateLimitExceeded;

/// Failures of the nutrition/menu completion service
#[derive(Debug, Clone, Error)]
pub enum NutritionError {
    /// The per-user sliding window is full
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
    /// The response is not JSON or violates the expected schema
    #[error("Service parse error: {0}")]
    Parse(String),
    /// Transport or HTTP status failure
    #[error("Network error: {0}")]
    Network(String),
    /// The call did not finish in time
    #[error("Timeout error: call exceeded {0}s")]
    Timeout(u64),
    /// Too many consecutive failures, calls are short-circuited
    #[error("Service temporarily unavailable")]
    CircuitOpen,
}

impl NutritionError {
    /// Whether a retry of the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, NutritionError::Network(_) | NutritionError::Timeout(_))
    }
}

impl From<reqwest::Error> for NutritionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NutritionError::Timeout(0)
        } else {
            NutritionError::Network(err.to_string())
        }
    }
}

/// Failures of the speech-to-text service
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("Voice message is {actual}s long, limit is {limit}s")]
    TooLong { actual: u32, limit: u32 },
    #[error("Speech recognition is not configured")]
    NotConfigured,
    #[error("Speech service error: {0}")]
    Network(String),
    #[error("Speech could not be recognized")]
    Unrecognized,
}

impl From<reqwest::Error> for SpeechError {
    fn from(err: reqwest::Error) -> Self {
        SpeechError::Network(err.to_string())
    }
}

/// Fatal startup configuration problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    MissingVar(String),
    #[error("{name} has invalid value '{value}'")]
    InvalidVar { name: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_formatting() {
        let parse = NutritionError::Parse("no total".to_string());
        assert_eq!(parse.to_string(), "Service parse error: no total");

        let timeout = NutritionError::Timeout(60);
        assert_eq!(timeout.to_string(), "Timeout error: call exceeded 60s");

        let missing = ConfigError::MissingVar("TELEGRAM_TOKEN".to_string());
        assert_eq!(missing.to_string(), "TELEGRAM_TOKEN must be set");
    }

    #[test]
    fn test_transient_classification() {
        assert!(NutritionError::Network("reset".into()).is_transient());
        assert!(NutritionError::Timeout(60).is_transient());
        assert!(!NutritionError::Parse("bad".into()).is_transient());
        assert!(!NutritionError::CircuitOpen.is_transient());
    }
}
