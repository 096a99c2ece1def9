//! Environment-driven configuration for the LLM pipeline.
//!
//! Values are read once at startup and passed to the client at construction
//! time; there is no hidden process-wide configuration state.

use crate::error::{Result, SqlGenError};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
    pub rate_limit_delay_secs: f64,
    pub max_retries: u32,
    pub max_healing_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-1.5-flash".to_string(),
            temperature: 0.3,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 2048,
            request_timeout_secs: 90,
            rate_limit_delay_secs: 1.0,
            max_retries: 3,
            max_healing_attempts: 3,
        }
    }
}

impl LlmConfig {
    /// Load configuration from the environment. `GEMINI_API_KEY` is required,
    /// everything else falls back to service defaults.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| SqlGenError::Config("GEMINI_API_KEY not set".to_string()))?;

        Ok(Self {
            api_key,
            model: env_or("GEMINI_MODEL_NAME", "gemini-1.5-flash"),
            temperature: env_parse("LLM_TEMPERATURE", 0.3)?,
            top_p: env_parse("LLM_TOP_P", 0.8)?,
            top_k: env_parse("LLM_TOP_K", 40)?,
            max_output_tokens: env_parse("LLM_MAX_TOKENS", 2048)?,
            request_timeout_secs: env_parse("REQUEST_TIMEOUT", 90)?,
            rate_limit_delay_secs: env_parse("RATE_LIMIT_DELAY", 1.0)?,
            max_retries: env_parse("LLM_MAX_RETRIES", 3)?,
            max_healing_attempts: env_parse("MAX_HEALING_ATTEMPTS", 3)?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| SqlGenError::Config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}
