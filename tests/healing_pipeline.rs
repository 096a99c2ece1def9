//! End-to-end tests for the healing pipeline against a scripted model backend.

use async_trait::async_trait;
use nlsql_engine::config::LlmConfig;
use nlsql_engine::error::{Result as SqlResult, SqlGenError};
use nlsql_engine::llm::{LlmClient, ProcessOutcome};
use nlsql_engine::model::{GenerationOptions, TextGenerator};
use nlsql_engine::schema::{ColumnInfo, Schema};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const ANALYSIS: &str = r#"{"query_type": "select", "required_columns": ["amount"], "conditions": [], "sort": {"column": "amount", "order": "desc"}, "limit": 10, "explanation": "top sales"}"#;
const SQL: &str = "SELECT amount FROM sales ORDER BY amount DESC LIMIT 10";
const VALID: &str = r#"{"isValid": true, "issues": [], "suggestedFixes": [], "explanation": "looks good"}"#;
const INVALID: &str = r#"{"isValid": false, "issues": ["unknown column price"], "suggestedFixes": ["use amount"], "explanation": "bad column"}"#;

fn heal_patch(healed_query: &str) -> String {
    format!(
        r#"{{"healed_query": "{}", "changes_made": [{{"issue": "bad column", "fix": "renamed", "reasoning": "schema match"}}], "requires_reanalysis": false, "confidence": 0.9, "requires_human_review": false, "notes": "renamed column"}}"#,
        healed_query
    )
}

fn heal_flags(requires_reanalysis: bool, requires_human_review: bool) -> String {
    format!(
        r#"{{"healed_query": "", "changes_made": [], "requires_reanalysis": {}, "confidence": 0.2, "requires_human_review": {}, "notes": "needs a human"}}"#,
        requires_reanalysis, requires_human_review
    )
}

/// Responses for one stage, replayed in order; the last one repeats. An empty
/// script fails the call.
struct StageScript {
    responses: Vec<String>,
    calls: AtomicUsize,
}

impl StageScript {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: responses.iter().map(|r| r.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> SqlResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let index = call.min(self.responses.len().saturating_sub(1));
        match self.responses.get(index) {
            Some(response) => Ok(response.clone()),
            None => Err(SqlGenError::Generation("no scripted response".to_string())),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Routes each prompt to the matching stage script by its leading line.
struct ScriptedModel {
    analyze: StageScript,
    generate: StageScript,
    validate: StageScript,
    heal: StageScript,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(analyze: &[&str], generate: &[&str], validate: &[&str], heal: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            analyze: StageScript::new(analyze),
            generate: StageScript::new(generate),
            validate: StageScript::new(validate),
            heal: StageScript::new(heal),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedModel {
    async fn generate_text(&self, prompt: &str, _options: &GenerationOptions) -> SqlResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if prompt.starts_with("Analyze this question") {
            self.analyze.next()
        } else if prompt.starts_with("Generate a SQL query") {
            self.generate.next()
        } else if prompt.starts_with("Validate this SQL query") {
            self.validate.next()
        } else if prompt.starts_with("Fix this SQL query") {
            self.heal.next()
        } else {
            Err(SqlGenError::Generation(format!(
                "unexpected prompt: {}",
                prompt
            )))
        }
    }
}

fn test_config(max_healing_attempts: u32) -> LlmConfig {
    LlmConfig {
        rate_limit_delay_secs: 0.0,
        max_retries: 1,
        request_timeout_secs: 5,
        max_healing_attempts,
        ..LlmConfig::default()
    }
}

fn sales_schema() -> Schema {
    let mut schema = Schema::new();
    schema.insert(
        "amount".to_string(),
        ColumnInfo {
            inferred_type: "float".to_string(),
            sample: "12.5".to_string(),
        },
    );
    schema.insert(
        "region".to_string(),
        ColumnInfo {
            inferred_type: "string".to_string(),
            sample: "north".to_string(),
        },
    );
    schema.insert(
        "sale_date".to_string(),
        ColumnInfo {
            inferred_type: "string".to_string(),
            sample: "2025-03-01".to_string(),
        },
    );
    schema
}

fn client(model: Arc<ScriptedModel>, max_healing_attempts: u32) -> LlmClient {
    LlmClient::with_generator(model, &test_config(max_healing_attempts))
}

#[tokio::test]
async fn first_valid_query_succeeds_without_healing() {
    let model = ScriptedModel::new(&[ANALYSIS], &[SQL], &[VALID], &[]);
    let outcome = client(model.clone(), 3)
        .process_with_healing("top sales by amount", &sales_schema())
        .await
        .unwrap();

    match outcome {
        ProcessOutcome::Success {
            query,
            healing_attempts,
            ..
        } => {
            assert_eq!(query, SQL);
            assert_eq!(healing_attempts, 0);
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(model.heal.calls(), 0);
    assert_eq!(model.analyze.calls(), 1);
}

#[tokio::test]
async fn healed_query_is_revalidated_not_regenerated() {
    let patched = "SELECT amount FROM sales LIMIT 10";
    let patch = heal_patch(patched);
    let model = ScriptedModel::new(&[ANALYSIS], &[SQL], &[INVALID, VALID], &[patch.as_str()]);
    let outcome = client(model.clone(), 3)
        .process_with_healing("top sales", &sales_schema())
        .await
        .unwrap();

    match outcome {
        ProcessOutcome::Success {
            query,
            healing_attempts,
            ..
        } => {
            assert_eq!(query, patched);
            assert_eq!(healing_attempts, 1);
        }
        other => panic!("expected success, got {:?}", other),
    }
    // The patched query goes straight back to validation.
    assert_eq!(model.generate.calls(), 1);
    assert_eq!(model.validate.calls(), 2);
}

#[tokio::test]
async fn attempts_match_number_of_failed_validations() {
    let first = heal_patch("SELECT amount FROM sales");
    let second = heal_patch("SELECT amount FROM sales LIMIT 10");
    let model = ScriptedModel::new(
        &[ANALYSIS],
        &[SQL],
        &[INVALID, INVALID, VALID],
        &[first.as_str(), second.as_str()],
    );
    let outcome = client(model.clone(), 3)
        .process_with_healing("top sales", &sales_schema())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.healing_attempts(), 2);
    assert_eq!(model.heal.calls(), 2);
}

#[tokio::test]
async fn human_review_terminates_immediately() {
    let escalate = heal_flags(false, true);
    let model = ScriptedModel::new(&[ANALYSIS], &[SQL], &[INVALID], &[escalate.as_str()]);
    let outcome = client(model.clone(), 3)
        .process_with_healing("top sales", &sales_schema())
        .await
        .unwrap();

    match outcome {
        ProcessOutcome::HumanReviewRequired {
            error,
            healing_attempts,
            notes,
            ..
        } => {
            assert_eq!(error, "Query requires human review");
            assert_eq!(healing_attempts, 1);
            assert_eq!(notes, "needs a human");
        }
        other => panic!("expected human review, got {:?}", other),
    }
    // No further generate/validate cycle after the escalation.
    assert_eq!(model.generate.calls(), 1);
    assert_eq!(model.validate.calls(), 1);
}

#[tokio::test]
async fn human_review_wins_over_reanalysis() {
    let both_flags = heal_flags(true, true);
    let model = ScriptedModel::new(&[ANALYSIS], &[SQL], &[INVALID], &[both_flags.as_str()]);
    let outcome = client(model.clone(), 3)
        .process_with_healing("top sales", &sales_schema())
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        ProcessOutcome::HumanReviewRequired { .. }
    ));
    assert_eq!(model.analyze.calls(), 1);
}

#[tokio::test]
async fn reanalysis_reruns_analyze_without_resetting_counter() {
    let reanalyze = heal_flags(true, false);
    let model = ScriptedModel::new(
        &[ANALYSIS],
        &[SQL],
        &[INVALID, VALID],
        &[reanalyze.as_str()],
    );
    let outcome = client(model.clone(), 3)
        .process_with_healing("top sales", &sales_schema())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.healing_attempts(), 1);
    assert_eq!(model.analyze.calls(), 2);
    assert_eq!(model.generate.calls(), 2);
}

#[tokio::test]
async fn budget_exhaustion_reports_attempt_count() {
    let patch = heal_patch("SELECT amount FROM sales");
    let model = ScriptedModel::new(
        &[ANALYSIS],
        &[SQL],
        &[INVALID],
        &[patch.as_str()],
    );
    let outcome = client(model.clone(), 3)
        .process_with_healing("top sales", &sales_schema())
        .await
        .unwrap();

    match &outcome {
        ProcessOutcome::AttemptsExhausted {
            error,
            healing_attempts,
        } => {
            assert_eq!(error, "Max healing attempts reached");
            assert_eq!(*healing_attempts, 3);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert_eq!(model.heal.calls(), 3);

    let response = outcome.to_response();
    assert_eq!(response["success"], serde_json::json!(false));
    assert_eq!(response["healing_attempts"], serde_json::json!(3));
}

#[tokio::test]
async fn malformed_validation_json_counts_attempts_until_fatal() {
    let model = ScriptedModel::new(&[ANALYSIS], &[SQL], &["this is not json"], &[]);
    let result = client(model.clone(), 2)
        .process_with_healing("top sales", &sales_schema())
        .await;

    assert!(matches!(result, Err(SqlGenError::Validation(_))));
    assert_eq!(model.validate.calls(), 2);
}

#[tokio::test]
async fn malformed_analysis_json_counts_attempts_until_fatal() {
    let model = ScriptedModel::new(&["oops"], &[], &[], &[]);
    let result = client(model.clone(), 3)
        .process_with_healing("top sales", &sales_schema())
        .await;

    assert!(matches!(result, Err(SqlGenError::Analysis(_))));
    assert_eq!(model.analyze.calls(), 3);
}

#[tokio::test]
async fn heal_failures_consume_an_extra_attempt() {
    // Heal errors land after the pre-heal increment, so each one costs two
    // units of the budget.
    let model = ScriptedModel::new(&[ANALYSIS], &[SQL], &[INVALID], &[]);
    let result = client(model.clone(), 3)
        .process_with_healing("top sales", &sales_schema())
        .await;

    assert!(matches!(result, Err(SqlGenError::Healing(_))));
    assert_eq!(model.heal.calls(), 2);
}

#[tokio::test]
async fn fenced_payloads_are_unwrapped() {
    let fenced_analysis = format!("```json\n{}\n```", ANALYSIS);
    let fenced_sql = format!("```\n{}\n```", SQL);
    let fenced_valid = format!("```json\n{}\n```", VALID);
    let model = ScriptedModel::new(
        &[fenced_analysis.as_str()],
        &[fenced_sql.as_str()],
        &[fenced_valid.as_str()],
        &[],
    );

    let outcome = client(model, 3)
        .process_with_healing("top sales", &sales_schema())
        .await
        .unwrap();

    match outcome {
        ProcessOutcome::Success { query, .. } => assert_eq!(query, SQL),
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn empty_healed_query_is_applied_as_is() {
    let empty_patch = heal_patch("");
    let model = ScriptedModel::new(&[ANALYSIS], &[SQL], &[INVALID], &[empty_patch.as_str()]);
    let outcome = client(model.clone(), 2)
        .process_with_healing("top sales", &sales_schema())
        .await
        .unwrap();

    assert!(matches!(outcome, ProcessOutcome::AttemptsExhausted { .. }));

    // The second validation round saw the empty patched query.
    let validations: Vec<String> = model
        .prompts()
        .into_iter()
        .filter(|p| p.starts_with("Validate this SQL query"))
        .collect();
    assert_eq!(validations.len(), 2);
    assert!(validations[1].contains("Query:\n\n"));
}
