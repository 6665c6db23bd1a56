use thiserror::Error;

#[derive(Error, Debug)]
pub enum PvError {
    #[error("Blocked a non-SELECT or potentially destructive SQL: {sql}")]
    RejectedQuery { sql: String },

    #[error("Destructive intent detected: this assistant is read-only")]
    DestructiveIntent,

    #[error("Question is empty")]
    EmptyQuestion,

    #[error("Query failed: {message} (sql: {sql})")]
    Execution { sql: String, message: String },

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Invalid column '{column}': {reason}")]
    InvalidColumn { column: String, reason: String },

    #[error("Invalid aggregation '{0}': expected one of default, hourly, daily, monthly, yearly")]
    InvalidAggregation(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for PvError {
    fn from(err: polars::error::PolarsError) -> Self {
        PvError::Polars(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PvError>;
