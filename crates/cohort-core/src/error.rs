use serde::Serialize;

/// Top-level error type for the Cohort orchestration engine.
///
/// The first four variants form the caller-facing taxonomy returned by
/// commands. None of them is retried by the engine. A task with no eligible
/// agent is not an error; it stays pending.
#[derive(Debug, thiserror::Error)]
pub enum CohortError {
    /// Malformed input, e.g. an unknown role or a zero concurrency limit.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An agent, task, workflow or mailbox id that does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is not legal in the entity's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The operation conflicts with live state the caller must resolve first.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CohortError {
    /// Stable machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            CohortError::Validation(_) => "validation",
            CohortError::NotFound(_) => "not_found",
            CohortError::InvalidState(_) => "invalid_state",
            CohortError::Conflict(_) => "conflict",
            CohortError::Config(_) => "config",
            CohortError::Json(_) => "json",
            CohortError::Io(_) => "io",
        }
    }

    /// Structured form of the error for command/query responses.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serializable error payload handed back to external callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Error class, see [`CohortError::kind`].
    pub kind: String,
    /// Human-readable description.
    pub message: String,
}

/// A convenience `Result` alias using [`CohortError`].
pub type CohortResult<T> = Result<T, CohortError>;
