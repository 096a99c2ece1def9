//! Prompt-driven SQL pipeline: analyze, generate, validate, heal.
//!
//! Each stage is one model call plus response parsing. Stage payloads coming
//! back from the model are opaque JSON: decodability is checked, individual
//! fields are read leniently with defaults, mirroring how the service treats
//! model output as untrusted free text.

use crate::config::LlmConfig;
use crate::error::{Result, SqlGenError};
use crate::invoker::{clean_response, ModelInvoker};
use crate::model::{GeminiClient, GenerationOptions, TextGenerator};
use crate::rate_limit::RateLimiter;
use crate::schema::{identify_special_columns, Schema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Structured breakdown of the question, as returned by the Analyze stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis(pub Value);

/// Verdict from the Validate stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult(pub Value);

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.0
            .get("isValid")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn issues(&self) -> Vec<String> {
        self.0
            .get("issues")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Repair proposal from the Heal stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingResult(pub Value);

impl HealingResult {
    pub fn healed_query(&self) -> String {
        self.0
            .get("healed_query")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    }

    pub fn requires_reanalysis(&self) -> bool {
        self.0
            .get("requires_reanalysis")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn requires_human_review(&self) -> bool {
        self.0
            .get("requires_human_review")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn confidence(&self) -> f64 {
        self.0
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn notes(&self) -> String {
        self.0
            .get("notes")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    }
}

/// Terminal result of one `process_with_healing` run.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Success {
        query: String,
        analysis: Analysis,
        validation: ValidationResult,
        healing_attempts: u32,
    },
    HumanReviewRequired {
        error: String,
        validation: ValidationResult,
        healing_attempts: u32,
        notes: String,
    },
    AttemptsExhausted {
        error: String,
        healing_attempts: u32,
    },
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Success { .. })
    }

    pub fn healing_attempts(&self) -> u32 {
        match self {
            ProcessOutcome::Success { healing_attempts, .. }
            | ProcessOutcome::HumanReviewRequired { healing_attempts, .. }
            | ProcessOutcome::AttemptsExhausted { healing_attempts, .. } => *healing_attempts,
        }
    }

    /// Wire shape consumed by the HTTP-facing layer.
    pub fn to_response(&self) -> Value {
        match self {
            ProcessOutcome::Success {
                query,
                analysis,
                validation,
                healing_attempts,
            } => json!({
                "success": true,
                "query": query,
                "analysis": analysis,
                "validation": validation,
                "healing_attempts": healing_attempts,
            }),
            ProcessOutcome::HumanReviewRequired {
                error,
                validation,
                healing_attempts,
                notes,
            } => json!({
                "success": false,
                "error": error,
                "validation": validation,
                "healing_attempts": healing_attempts,
                "notes": notes,
            }),
            ProcessOutcome::AttemptsExhausted {
                error,
                healing_attempts,
            } => json!({
                "success": false,
                "error": error,
                "healing_attempts": healing_attempts,
            }),
        }
    }
}

/// Client for the natural-language-to-SQL pipeline. Explicitly constructed
/// with its configuration; tests inject mock backends via `with_generator`.
pub struct LlmClient {
    invoker: ModelInvoker,
    max_healing_attempts: u32,
}

impl LlmClient {
    /// Build a client over the real Gemini backend.
    pub fn new(config: &LlmConfig) -> Self {
        let generator = Arc::new(GeminiClient::new(
            config.api_key.clone(),
            config.model.clone(),
        ));
        Self::with_generator(generator, config)
    }

    /// Build a client over any text-generation backend.
    pub fn with_generator(generator: Arc<dyn TextGenerator>, config: &LlmConfig) -> Self {
        let limiter = RateLimiter::new(Duration::from_secs_f64(config.rate_limit_delay_secs));
        let invoker = ModelInvoker::new(
            generator,
            limiter,
            GenerationOptions::from(config),
            Duration::from_secs(config.request_timeout_secs),
            config.max_retries,
        );
        Self {
            invoker,
            max_healing_attempts: config.max_healing_attempts,
        }
    }

    /// Analyze the question against the schema and column categories.
    pub async fn analyze_query(&self, question: &str, schema: &Schema) -> Result<Analysis> {
        info!("Starting query analysis for: {}", question);

        let column_types = identify_special_columns(schema);
        debug!("Identified column types: {:?}", column_types);

        let schema_json = to_pretty_json(schema)?;
        let categories_json = to_pretty_json(&column_types)?;

        let prompt = format!(
            r#"Analyze this question for the given dataset:

Question: {question}

Available Schema:
{schema_json}

Column Categories:
{categories_json}

Return ONLY a JSON object with this structure (no additional text or explanations):
{{
    "query_type": "select",
    "required_columns": ["list", "of", "columns"],
    "conditions": ["list", "of", "conditions"],
    "sort": {{"column": "name", "order": "desc"}},
    "limit": number,
    "explanation": "brief explanation"
}}"#
        );

        let response = self
            .invoker
            .generate(&prompt)
            .await
            .map_err(|e| SqlGenError::Analysis(e.to_string()))?;
        let cleaned = clean_response(&response);
        debug!("Cleaned analysis response: {}", cleaned);

        let value = parse_json(&cleaned).map_err(|e| SqlGenError::Analysis(e.to_string()))?;
        info!("Analysis completed successfully");
        Ok(Analysis(value))
    }

    /// Generate a SQL query from an analysis. Output is raw SQL text.
    pub async fn generate_query(&self, analysis: &Analysis, schema: &Schema) -> Result<String> {
        info!("Starting query generation");

        let analysis_json = to_pretty_json(&analysis.0)?;
        let schema_json = to_pretty_json(schema)?;

        let prompt = format!(
            r#"Generate a SQL query based on this analysis:

Analysis:
{analysis_json}

Schema:
{schema_json}

Return ONLY the SQL query, no explanations or additional text."#
        );

        let response = self.invoker.generate(&prompt).await?;
        let cleaned = clean_response(&response);
        info!("Query generated successfully");
        Ok(cleaned)
    }

    /// Ask the model to check the query against the schema.
    pub async fn validate_query(&self, query: &str, schema: &Schema) -> Result<ValidationResult> {
        info!("Starting query validation");

        let schema_json = to_pretty_json(schema)?;

        let prompt = format!(
            r#"Validate this SQL query:

Query:
{query}

Schema:
{schema_json}

Return ONLY a JSON object with this structure:
{{
    "isValid": true/false,
    "issues": ["list", "of", "issues"],
    "suggestedFixes": ["list", "of", "fixes"],
    "explanation": "validation explanation"
}}"#
        );

        let response = self
            .invoker
            .generate(&prompt)
            .await
            .map_err(|e| SqlGenError::Validation(e.to_string()))?;
        let cleaned = clean_response(&response);

        let value = parse_json(&cleaned).map_err(|e| SqlGenError::Validation(e.to_string()))?;
        let validation = ValidationResult(value);
        info!("Validation completed: isValid={}", validation.is_valid());
        Ok(validation)
    }

    /// Ask the model to repair an invalid query.
    pub async fn heal_query(
        &self,
        validation: &ValidationResult,
        original_query: &str,
        analysis: &Analysis,
        schema: &Schema,
    ) -> Result<HealingResult> {
        info!("Starting query healing process");
        debug!("Original query: {}", original_query);
        debug!("Validation issues: {:?}", validation.issues());

        let validation_json = to_pretty_json(&validation.0)?;
        let analysis_json = to_pretty_json(&analysis.0)?;
        let schema_json = to_pretty_json(schema)?;

        let prompt = format!(
            r#"Fix this SQL query based on the validation results:

Original Query:
{original_query}

Validation Issues:
{validation_json}

Original Analysis:
{analysis_json}

Schema:
{schema_json}

Return ONLY a JSON object with this structure:
{{
    "healed_query": "fixed SQL query",
    "changes_made": [
        {{
            "issue": "description of what was wrong",
            "fix": "description of how it was fixed",
            "reasoning": "explanation of why this fix works"
        }}
    ],
    "requires_reanalysis": false,
    "confidence": 0.0-1.0,
    "requires_human_review": false,
    "notes": "explanation of changes"
}}"#
        );

        let response = self
            .invoker
            .generate(&prompt)
            .await
            .map_err(|e| SqlGenError::Healing(e.to_string()))?;
        let cleaned = clean_response(&response);

        let value = parse_json(&cleaned).map_err(|e| SqlGenError::Healing(e.to_string()))?;
        let healing = HealingResult(value);
        info!("Healing completed: confidence={}", healing.confidence());
        Ok(healing)
    }

    /// Run the bounded analyze -> generate -> validate -> heal loop until a
    /// valid query is produced, the model escalates to human review, or the
    /// healing attempt budget is spent.
    ///
    /// Every stage failure inside the loop consumes one healing attempt and
    /// the loop carries on; once the budget is spent the failure propagates
    /// fatally. A heal failure lands after the pre-heal increment, so it
    /// consumes two units, matching the original service's counting.
    pub async fn process_with_healing(
        &self,
        question: &str,
        schema: &Schema,
    ) -> Result<ProcessOutcome> {
        let request_id = Uuid::new_v4();
        let max_healing_attempts = self.max_healing_attempts;

        let mut healing_attempts: u32 = 0;
        let mut current_analysis: Option<Analysis> = None;
        let mut current_query: Option<String> = None;

        while healing_attempts < max_healing_attempts {
            info!(
                "[{}] Processing attempt {}/{}",
                request_id,
                healing_attempts + 1,
                max_healing_attempts
            );

            // Fresh start, or a prior iteration forced reanalysis.
            if current_analysis.is_none() {
                match self.analyze_query(question, schema).await {
                    Ok(analysis) => {
                        info!("[{}] Analysis completed", request_id);
                        current_analysis = Some(analysis);
                    }
                    Err(e) => {
                        warn!("[{}] Error in healing attempt: {}", request_id, e);
                        healing_attempts += 1;
                        if healing_attempts >= max_healing_attempts {
                            return Err(e);
                        }
                        continue;
                    }
                }
            }
            let analysis = match current_analysis.clone() {
                Some(analysis) => analysis,
                None => continue,
            };

            // A query patched by Heal is re-validated, not regenerated.
            if current_query.is_none() {
                match self.generate_query(&analysis, schema).await {
                    Ok(query) => {
                        info!("[{}] Query generated: {}", request_id, query);
                        current_query = Some(query);
                    }
                    Err(e) => {
                        warn!("[{}] Error in healing attempt: {}", request_id, e);
                        healing_attempts += 1;
                        if healing_attempts >= max_healing_attempts {
                            return Err(e);
                        }
                        continue;
                    }
                }
            }
            let query = match current_query.clone() {
                Some(query) => query,
                None => continue,
            };

            let validation = match self.validate_query(&query, schema).await {
                Ok(validation) => validation,
                Err(e) => {
                    warn!("[{}] Error in healing attempt: {}", request_id, e);
                    healing_attempts += 1;
                    if healing_attempts >= max_healing_attempts {
                        return Err(e);
                    }
                    continue;
                }
            };
            info!(
                "[{}] Validation result: isValid={}",
                request_id,
                validation.is_valid()
            );

            if validation.is_valid() {
                return Ok(ProcessOutcome::Success {
                    query,
                    analysis,
                    validation,
                    healing_attempts,
                });
            }

            // Invalid: this costs one healing attempt.
            healing_attempts += 1;
            info!(
                "[{}] Starting healing attempt {}/{}",
                request_id, healing_attempts, max_healing_attempts
            );

            let healing = match self
                .heal_query(&validation, &query, &analysis, schema)
                .await
            {
                Ok(healing) => healing,
                Err(e) => {
                    warn!("[{}] Error in healing attempt: {}", request_id, e);
                    healing_attempts += 1;
                    if healing_attempts >= max_healing_attempts {
                        return Err(e);
                    }
                    continue;
                }
            };

            // Human review wins over reanalysis when both are set.
            if healing.requires_human_review() {
                warn!("[{}] Query requires human review", request_id);
                return Ok(ProcessOutcome::HumanReviewRequired {
                    error: "Query requires human review".to_string(),
                    validation,
                    healing_attempts,
                    notes: healing.notes(),
                });
            }

            if healing.requires_reanalysis() {
                info!("[{}] Healing suggests reanalysis", request_id);
                current_analysis = None;
                current_query = None;
                continue;
            }

            let healed = healing.healed_query();
            info!("[{}] Applied healed query: {}", request_id, healed);
            current_query = Some(healed);
        }

        warn!("[{}] Max healing attempts reached", request_id);
        Ok(ProcessOutcome::AttemptsExhausted {
            error: "Max healing attempts reached".to_string(),
            healing_attempts,
        })
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn parse_json(cleaned: &str) -> Result<Value> {
    serde_json::from_str(cleaned).map_err(|e| SqlGenError::Parse(e.to_string()))
}
