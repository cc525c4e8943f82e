//! Error kinds for the semantic memory engine.
//!
//! Mirrors the recovery policy from the design: `NotFound`/`Validation` are
//! actionable and returned straight to the caller, `Storage` is surfaced with
//! context rather than swallowed, and the external-provider kinds
//! (`Embedding`/`Llm`/`Reranker`) are classified by each consumer as
//! hard-fail or soft-fail depending on where they occur in the pipeline.

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the memory engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A memory, association, session, workspace or context id did not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied input failed validation (empty content, self-association,
    /// unknown resolution strategy, bad direction, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// Backend I/O failure. Always carries context, never swallowed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Embedding provider failed. Hard-fail on ingest, soft-fail elsewhere.
    #[error("embedding provider failure: {0}")]
    Embedding(String),

    /// LLM provider failure (synthesis, rewrite, classification, decomposition).
    #[error("llm provider failure: {0}")]
    Llm(String),

    /// Reranker service failure.
    #[error("reranker failure: {0}")]
    Reranker(String),

    /// An LLM-backed classifier was unavailable; caller should fall back to a
    /// static default (`semantic` memory type, `related_to` relationship).
    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(String),

    /// A background task handler raised an error. Logged with task type and
    /// payload summary; the task is still considered done.
    #[error("task handler failure ({task_type}): {source}")]
    TaskHandlerFailure {
        /// The task type whose handler failed.
        task_type: String,
        /// The underlying error, boxed since handlers may fail in varied ways.
        #[source]
        source: anyhow::Error,
    },

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying I/O failure (config load, file-backed storage).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error represents a condition a caller might retry.
    ///
    /// Recoverability classifier: storage and external
    /// provider failures are transient and may be retried; validation and
    /// not-found are not.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Storage(_) | Error::Embedding(_) | Error::Llm(_) | Error::Reranker(_) => true,
            Error::NotFound(_)
            | Error::Validation(_)
            | Error::ClassificationUnavailable(_)
            | Error::TaskHandlerFailure { .. }
            | Error::Serialization(_)
            | Error::Io(_) => false,
        }
    }

    /// Construct a `NotFound` for a given entity kind and id, matching the
    /// wording convention used across the storage layer.
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("{kind} {id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_and_provider_failures_are_recoverable() {
        assert!(Error::Storage("down".into()).is_recoverable());
        assert!(Error::Embedding("timeout".into()).is_recoverable());
        assert!(Error::Llm("rate limited".into()).is_recoverable());
        assert!(Error::Reranker("unavailable".into()).is_recoverable());
    }

    #[test]
    fn validation_and_not_found_are_not_recoverable() {
        assert!(!Error::Validation("empty content".into()).is_recoverable());
        assert!(!Error::not_found("memory", "mem_123").is_recoverable());
    }

    #[test]
    fn not_found_formats_kind_and_id() {
        let err = Error::not_found("session", "sess_abc");
        assert_eq!(err.to_string(), "not found: session sess_abc");
    }
}
