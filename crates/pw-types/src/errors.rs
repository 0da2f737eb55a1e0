use thiserror::Error;

/// Main error type for the Promptwise system
#[derive(Error, Debug)]
pub enum PwError {
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Merge error: {message}")]
    Merge { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PwError {
    pub fn parse(message: impl Into<String>) -> Self {
        PwError::Parse {
            message: message.into(),
        }
    }

    /// Failure reported by a merge collaborator.
    pub fn merge(message: impl Into<String>) -> Self {
        PwError::Merge {
            message: message.into(),
        }
    }
}

/// Errors raised by a prompt-model backend while drafting a variant
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Prompt model backend failed: {message}")]
    Backend { message: String },

    #[error("Prompt model timed out after {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    #[error("Prompt model returned an empty response")]
    EmptyResponse,
}

/// Errors raised while scoring a candidate
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Scorer failed: {message}")]
    Scorer { message: String },

    #[error("Cannot evaluate against an empty dataset")]
    EmptyDataset,
}

/// Result type alias for Promptwise operations
pub type PwResult<T> = Result<T, PwError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::PwError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::PwError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::PwError::Config(format!($($arg)*))
    };
}
