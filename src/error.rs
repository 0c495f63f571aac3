use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsightsError {
    #[error("Query rejected: {0}")]
    RejectedQuery(String),

    #[error("Query appears unrelated to laboratory/medical domain: {0}")]
    UnrelatedDomain(String),

    #[error("{0}")]
    MissingContext(String),

    #[error("No valid SQL in model response: {0}")]
    ExtractionFailure(String),

    #[error("Privacy violation: {column} cannot be returned")]
    PrivacyViolation { column: String },

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("Chart formatting error: {0}")]
    Chart(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, InsightsError>;
