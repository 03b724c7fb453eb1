//! Crate-wide error taxonomy.
//!
//! One enum covers the whole engine so that `?` composes across the
//! storage, inference, and retrieval layers. Degradation policy (what is
//! logged-and-swallowed vs. what surfaces) lives with the callers, not
//! here; the only hard rule is that [`CoreError::Cancelled`] is never
//! swallowed anywhere.

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Invalid input: empty text, importance out of range, closed-enum violation
    #[error("Validation failed: {0}")]
    Validation(String),
    /// Document, node, or edge not present
    #[error("Not found: {0}")]
    NotFound(String),
    /// Operation not supported by this store (e.g. vector store `get`)
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// Transport failure to the LM, graph, or vector backend
    #[error("Backend unavailable: {0}")]
    Backend(String),
    /// LM returned malformed or incomplete JSON
    #[error("Parse error: {0}")]
    Parse(String),
    /// Caller cancelled; propagated untouched through every layer
    #[error("Operation cancelled")]
    Cancelled,
    /// Missing credentials or unreachable backend at startup
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Write conflicted with existing state
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Catalog database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error (index persistence, data directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether this error is a caller cancellation.
    ///
    /// Degrading code paths (pipeline stages, best-effort writes) must
    /// check this before swallowing an error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }

    /// Whether retrying the operation could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Backend(_))
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_not_retryable() {
        assert!(CoreError::Cancelled.is_cancelled());
        assert!(!CoreError::Cancelled.is_retryable());
    }

    #[test]
    fn test_backend_is_retryable() {
        let err = CoreError::Backend("connection refused".to_string());
        assert!(err.is_retryable());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = CoreError::Validation("importance out of range".to_string());
        assert!(err.to_string().contains("importance out of range"));
    }
}
