use thiserror::Error;

/// Marker carried in every parse failure message so the retry layer can
/// classify structured-output truncation as transient.
pub const PARSE_FAILURE_MARKER: &str = "parse_json";

/// Errors raised by the council orchestration layer
#[derive(Error, Debug)]
pub enum CouncilError {
    /// Transport or provider failure reported by the completion oracle
    #[error("Oracle request failed: {0}")]
    Oracle(String),

    /// Structured output could not be parsed even after repair attempts
    #[error("Failed to parse structured oracle output ({marker}): {snippet}", marker = PARSE_FAILURE_MARKER)]
    ParseFailure { snippet: String },

    /// Caller supplied too little data for the requested step
    #[error("Insufficient patient data: {0}")]
    InsufficientData(String),

    /// Already translated, user-presentable message
    #[error("{0}")]
    UserFacing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl CouncilError {
    pub fn parse_failure(raw: &str) -> Self {
        let snippet: String = raw.chars().take(500).collect();
        CouncilError::ParseFailure { snippet }
    }

    /// True for failures the whole-request logic can never fix by retrying.
    pub fn is_request_logic(&self) -> bool {
        matches!(
            self,
            CouncilError::InsufficientData(_)
                | CouncilError::InvalidRequest(_)
                | CouncilError::Configuration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CouncilError>;
