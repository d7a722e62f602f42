use thiserror::Error;

use crate::domain::types::EntityClass;

/// Failures reported by a key-value store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store command failed: {0}")]
    Command(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::Command(message.into())
    }
}

/// Errors surfaced by cache components to the event and query layers.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("store call `{op}` timed out after {timeout_ms} ms")]
    Timeout { op: &'static str, timeout_ms: u64 },
    #[error("failed to serialize {entity} snapshot: {source}")]
    Serialization {
        entity: EntityClass,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Store(_) | CacheError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_failures_are_not_retryable() {
        let source = serde_json::from_str::<u8>("\"x\"").expect_err("invalid json");
        let err = CacheError::Serialization {
            entity: EntityClass::Board,
            source,
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("failed to serialize board snapshot"));
    }

    #[test]
    fn store_failures_are_retryable() {
        assert!(CacheError::from(StoreError::unavailable("connection refused")).is_retryable());
        assert!(
            CacheError::Timeout {
                op: "get",
                timeout_ms: 5
            }
            .is_retryable()
        );
    }
}
