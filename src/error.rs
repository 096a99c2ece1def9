use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlGenError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Invalid response format: {0}")]
    Parse(String),

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Healing failed: {0}")]
    Healing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SqlGenError>;
