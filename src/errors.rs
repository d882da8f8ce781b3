#![allow(dead_code)]

use thiserror::Error;

/// Typed error hierarchy for waygate.
///
/// Use at module boundaries (provider calls, tool execution, config
/// validation, persistence, sessions). Internal/leaf functions continue
/// using `anyhow::Result` — the `Internal` variant allows seamless
/// conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum WaygateError {
    #[error("not configured: {0}")]
    ConfigurationMissing(String),

    #[error("admission denied: {0}")]
    AdmissionDenied(String),

    #[error("provider failure: {0}")]
    ProviderFailure(String),

    #[error("tool '{tool}' failed: {message}")]
    ToolFailure { tool: String, message: String },

    #[error("security policy violation: {0}")]
    SecurityViolation(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("request handling panicked: {0}")]
    PanicCaught(String),

    #[error("fatal startup error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type WaygateResult<T> = std::result::Result<T, WaygateError>;

impl WaygateError {
    /// Whether the error is safe to show verbatim to an end user.
    pub fn user_message(&self) -> String {
        match self {
            WaygateError::ConfigurationMissing(_) => {
                "the assistant is not configured yet".to_string()
            }
            WaygateError::AdmissionDenied(msg) => msg.clone(),
            WaygateError::ProviderFailure(_) => {
                "I encountered an error talking to the model provider".to_string()
            }
            WaygateError::PanicCaught(_) => "something went wrong handling that".to_string(),
            WaygateError::SecurityViolation(msg) => msg.clone(),
            WaygateError::ToolFailure { message, .. } => message.clone(),
            WaygateError::PersistenceFailure(_) | WaygateError::Fatal(_) => {
                "an internal error occurred".to_string()
            }
            WaygateError::Internal(_) => "an internal error occurred".to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WaygateError::ProviderFailure(_) | WaygateError::AdmissionDenied(_)
        )
    }
}
