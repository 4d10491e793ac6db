use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for the pinmig tool
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Logging error: {message}")]
    Logging { message: String },
}

impl CoreError {
    /// Create a new logging error
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }
}

/// Machine-readable error payload used by `--json` output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub hint: Option<String>,
}

impl ErrorPayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<&CoreError> for ErrorPayload {
    fn from(error: &CoreError) -> Self {
        match error {
            CoreError::Json(e) => Self::new("JSON_ERROR", e.to_string()),
            CoreError::Logging { message } => Self::new("LOGGING_ERROR", message.clone()),
        }
    }
}
