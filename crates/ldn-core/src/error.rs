//! Unified error types for ldn

use thiserror::Error;

/// Unified error type for all ldn operations
#[derive(Error, Debug)]
pub enum LdnError {
    // Mailbox errors
    #[error("Inbox fetch failed: {0}")]
    Fetch(String),

    #[error("Inbox delivery failed: {0}")]
    Delivery(String),

    // Job errors
    #[error("Missing job parameter: {key}")]
    MissingParameter { key: String },

    #[error("Invalid job parameter {key}: {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("Invalid notification: {0}")]
    InvalidNotification(String),

    // Pipeline errors
    #[error("Stage '{stage}' failed (exit code {}): {stderr}", display_exit_code(.exit_code))]
    Execution {
        stage: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Stage '{stage}' cancelled after {after:?} timeout")]
    TimedOut {
        stage: String,
        after: std::time::Duration,
    },

    #[error("Failed to launch stage '{stage}': {reason}")]
    Spawn { stage: String, reason: String },

    #[error("Invalid pipeline: {0}")]
    Invalid(String),

    // State errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LdnError {
    /// Whether this error came from running a stage rather than from building it
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            Self::Execution { .. } | Self::TimedOut { .. } | Self::Spawn { .. }
        )
    }
}

fn display_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

/// Result type alias using LdnError
pub type Result<T> = std::result::Result<T, LdnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_display_includes_stderr() {
        let err = LdnError::Execution {
            stage: "embeddings".to_string(),
            exit_code: Some(2),
            stderr: "model not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("embeddings"));
        assert!(msg.contains("exit code 2"));
        assert!(msg.contains("model not found"));
    }

    #[test]
    fn test_execution_display_without_exit_code() {
        let err = LdnError::Execution {
            stage: "chunks".to_string(),
            exit_code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("exit code none"));
    }

    #[test]
    fn test_is_execution() {
        assert!(LdnError::TimedOut {
            stage: "x".to_string(),
            after: std::time::Duration::from_secs(1),
        }
        .is_execution());
        assert!(!LdnError::MissingParameter {
            key: "model".to_string()
        }
        .is_execution());
    }
}
