//! Error types for lamad-engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A referenced record vanished (or never existed)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rejected before any write (empty title/body, bad reference, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Caller lacks the author/instructor role the operation requires
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The record store itself failed; never retried here
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True for the vanished-record condition callers may choose to ignore
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }

    pub(crate) fn not_found(kind: &str, id: &str) -> Self {
        EngineError::NotFound(format!("{} {}", kind, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = EngineError::not_found("discussion", "d-1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: discussion d-1");
    }

    #[test]
    fn test_other_errors_are_not_not_found() {
        assert!(!EngineError::InvalidInput("title is required".into()).is_not_found());
        assert!(!EngineError::StoreUnavailable("down".into()).is_not_found());
    }
}
