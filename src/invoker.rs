//! A single logical model call: rate limiting, timeout, and bounded retries.

use crate::error::{Result, SqlGenError};
use crate::model::{GenerationOptions, TextGenerator};
use crate::rate_limit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error};

/// Fixed pause between retry attempts, independent of the rate-limit delay.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub struct ModelInvoker {
    generator: Arc<dyn TextGenerator>,
    limiter: RateLimiter,
    options: GenerationOptions,
    request_timeout: Duration,
    max_retries: u32,
}

impl ModelInvoker {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        limiter: RateLimiter,
        options: GenerationOptions,
        request_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            generator,
            limiter,
            options,
            request_timeout,
            max_retries,
        }
    }

    /// Generate text for `prompt`, retrying up to `max_retries` times. Empty
    /// responses and per-attempt timeouts count as failures. Returns the raw
    /// model text; cleaning is the caller's separate step.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let mut last_error = SqlGenError::Generation("no attempts made".to_string());

        for attempt in 1..=self.max_retries {
            self.limiter.acquire().await;
            debug!("Generating content (attempt {}/{})", attempt, self.max_retries);

            let outcome = match timeout(
                self.request_timeout,
                self.generator.generate_text(prompt, &self.options),
            )
            .await
            {
                Ok(Ok(text)) if text.is_empty() => Err(SqlGenError::Generation(
                    "Empty response from LLM".to_string(),
                )),
                Ok(Ok(text)) => Ok(text),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(SqlGenError::Generation(format!(
                    "LLM call timed out after {} seconds",
                    self.request_timeout.as_secs()
                ))),
            };

            match outcome {
                Ok(text) => {
                    debug!("Content generated successfully");
                    return Ok(text);
                }
                Err(e) => {
                    error!(
                        "Content generation failed (attempt {}/{}): {}",
                        attempt, self.max_retries, e
                    );
                    last_error = e;
                    if attempt < self.max_retries {
                        sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }

        Err(SqlGenError::Generation(format!(
            "Generation failed after {} attempts: {}",
            self.max_retries, last_error
        )))
    }
}

/// Strip the markdown fences the model sometimes wraps around JSON or SQL.
///
/// A ```json fence wins over a plain fence; an unclosed fence yields the rest
/// of the text. Extraction never fails hard: worst case the trimmed input is
/// returned unchanged.
pub fn clean_response(text: &str) -> String {
    let trimmed = text.trim();

    if let Some((_, rest)) = trimmed.split_once("```json") {
        let inner = rest.split("```").next().unwrap_or(rest);
        return inner.trim().to_string();
    }

    if let Some((_, rest)) = trimmed.split_once("```") {
        let inner = rest.split("```").next().unwrap_or(rest);
        return inner.trim().to_string();
    }

    trimmed.to_string()
}
