use anyhow::Result;
use clap::Parser;
use nlsql_engine::config::LlmConfig;
use nlsql_engine::llm::LlmClient;
use nlsql_engine::schema::{infer_column_type, Schema};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "nlsql-engine")]
#[command(about = "Natural language to SQL with self-healing validation")]
struct Args {
    /// The question to answer with SQL
    question: String,

    /// Path to a JSON file describing the dataset schema
    #[arg(short, long, default_value = "schema.json")]
    schema: PathBuf,

    /// Override the configured healing attempt budget
    #[arg(long)]
    max_healing_attempts: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = LlmConfig::from_env()?;
    if let Some(max) = args.max_healing_attempts {
        config.max_healing_attempts = max;
    }

    let raw = std::fs::read_to_string(&args.schema)?;
    let mut schema: Schema = serde_json::from_str(&raw)?;
    for info in schema.values_mut() {
        if info.inferred_type.is_empty() {
            info.inferred_type = infer_column_type(&info.sample).to_string();
        }
    }

    info!("Processing question: {}", args.question);

    let client = LlmClient::new(&config);
    let outcome = client.process_with_healing(&args.question, &schema).await?;

    println!("{}", serde_json::to_string_pretty(&outcome.to_response())?);
    Ok(())
}
