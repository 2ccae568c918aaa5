//! Error types for the loan eligibility pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Core Pipeline Errors
    // =============================

    /// Ledger input is missing columns or carries unparseable values.
    /// Raised before any oracle call is made.
    #[error("Malformed ledger: {0}")]
    MalformedLedger(String),

    /// Frozen scoring artifacts are missing or corrupt.
    #[error("Scoring model unavailable: {0}")]
    ModelUnavailable(String),

    /// Similarity search failed. Recovered inside the retrieval boundary.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// The reasoning oracle failed or timed out. Fatal to the run.
    #[error("Reasoning oracle error: {0}")]
    Reasoning(String),

    #[error("Invalid {stage} response: {detail}")]
    InvalidResponse { stage: &'static str, detail: String },

    /// A stage ran before the state it depends on was produced.
    #[error("Pipeline state error: {0}")]
    State(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<sqlx::Error> for PipelineError {
    fn from(error: sqlx::Error) -> Self {
        PipelineError::Database(error.to_string())
    }
}
