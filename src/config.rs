//! # Configuration Module
//!
//! This module defines configuration structures for the bot: credentials,
//! rate-limit ceilings, retry/recovery settings for the completion service and
//! scheduler timings. Every structure has sensible defaults; `BotConfig::from_env`
//! overlays values from the process environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

// Constants for bot configuration
pub const DEFAULT_DATABASE_PATH: &str = "data/users.db";
pub const DEFAULT_MAX_REQUESTS_PER_WINDOW: usize = 2;
pub const DEFAULT_WINDOW_SECONDS: u64 = 60;
pub const DEFAULT_CONCURRENT_REQUESTS: usize = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MENU_COOLDOWN_HOURS: i64 = 6;
pub const DEFAULT_MAX_VOICE_SECONDS: u32 = 20;
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 3; // Moscow time

/// Per-user and global throttling settings for the completion service
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per user inside one window
    pub max_requests: usize,
    /// Length of the sliding window
    pub window: Duration,
    /// Simultaneous in-flight requests across all users
    pub max_concurrent: usize,
    /// Upper bound for one wrapped call
    pub call_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS_PER_WINDOW,
            window: Duration::from_secs(DEFAULT_WINDOW_SECONDS),
            max_concurrent: DEFAULT_CONCURRENT_REQUESTS,
            call_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Recovery configuration for calls to the completion service
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum number of retry attempts for transient failures
    pub max_retries: u32,
    /// Base delay between retries in milliseconds
    pub base_retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_retry_delay_ms: u64,
    /// Circuit breaker failure threshold
    pub circuit_breaker_threshold: u32,
    /// Circuit breaker reset timeout in seconds
    pub circuit_breaker_reset_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_retry_delay_ms: 500,
            max_retry_delay_ms: 5000,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_secs: 60, // 1 minute
        }
    }
}

/// Background task timings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Local hour at which the inactivity reminder goes out
    pub daily_reminder_hour: u32,
    /// Users without a meal logged for this many hours get the inactivity reminder
    pub inactivity_hours: i64,
    /// Offset of the bot's local time zone from UTC
    pub utc_offset_hours: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_reminder_hour: 10,
            inactivity_hours: 12,
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
        }
    }
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Complete process configuration
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: String,
    pub gpt_api_key: String,
    pub gpt_folder_id: String,
    /// Voice input is disabled when no key is configured
    pub speech_api_key: Option<String>,
    pub database_path: PathBuf,
    pub rate_limit: RateLimitConfig,
    pub recovery: RecoveryConfig,
    pub scheduler: SchedulerConfig,
    pub menu_cooldown_hours: i64,
    pub max_voice_seconds: u32,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl BotConfig {
    /// Read the configuration from the environment.
    ///
    /// Missing credentials are fatal; every other value falls back to its default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let rate_defaults = RateLimitConfig::default();
        let scheduler_defaults = SchedulerConfig::default();

        let log_format = match optional_var("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            Some("text") | None => LogFormat::Text,
            Some(other) => {
                return Err(ConfigError::InvalidVar {
                    name: "LOG_FORMAT".to_string(),
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            telegram_token: required_var("TELEGRAM_TOKEN")?,
            gpt_api_key: required_var("YANDEX_GPT_API_KEY")?,
            gpt_folder_id: required_var("YANDEX_GPT_FOLDER_ID")?,
            speech_api_key: optional_var("YANDEX_SPEECH_API_KEY"),
            database_path: optional_var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            rate_limit: RateLimitConfig {
                max_requests: parsed_var("MAX_REQUESTS_PER_MINUTE", rate_defaults.max_requests)?,
                window: Duration::from_secs(parsed_var(
                    "RATE_LIMIT_WINDOW_SECONDS",
                    DEFAULT_WINDOW_SECONDS,
                )?),
                max_concurrent: parsed_var("CONCURRENT_GPT", rate_defaults.max_concurrent)?,
                call_timeout: Duration::from_secs(parsed_var(
                    "GPT_TIMEOUT_SECONDS",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                )?),
            },
            recovery: RecoveryConfig::default(),
            scheduler: SchedulerConfig {
                daily_reminder_hour: parsed_var(
                    "DAILY_REMINDER_HOUR",
                    scheduler_defaults.daily_reminder_hour,
                )?,
                inactivity_hours: parsed_var("INACTIVITY_HOURS", scheduler_defaults.inactivity_hours)?,
                utc_offset_hours: parsed_var("UTC_OFFSET_HOURS", scheduler_defaults.utc_offset_hours)?,
            },
            menu_cooldown_hours: parsed_var("MENU_COOLDOWN_HOURS", DEFAULT_MENU_COOLDOWN_HOURS)?,
            max_voice_seconds: parsed_var("MAX_VOICE_SECONDS", DEFAULT_MAX_VOICE_SECONDS)?,
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_var(name: &str) -> Result<String, ConfigError> {
    optional_var(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match optional_var(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidVar {
            name: name.to_string(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 2);
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.call_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_recovery_defaults_reasonable() {
        let recovery = RecoveryConfig::default();
        assert!(recovery.max_retries <= 5);
        assert!(recovery.base_retry_delay_ms <= recovery.max_retry_delay_ms);
        assert!(recovery.circuit_breaker_threshold > 0);
    }

    #[test]
    fn test_parsed_var_falls_back_to_default() {
        let value: u32 = parsed_var("CALORIE_BOT_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
