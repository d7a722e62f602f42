use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::{pagination::PaginationError, source::SourceError},
    cache::CacheError,
    domain::error::DomainError,
};

/// Flattened view of an error and its source chain, for logs and summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn joined(&self) -> String {
        self.messages.join(": ")
    }
}

/// Failures visible to query callers.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    NotFound(#[from] DomainError),
    #[error("backing service unavailable")]
    Unavailable(#[source] Box<dyn StdError + Send + Sync>),
    #[error("query exceeded its deadline of {deadline_ms} ms")]
    DeadlineExceeded { deadline_ms: u64 },
    #[error(transparent)]
    InvalidCursor(#[from] PaginationError),
}

impl QueryError {
    /// Message safe to show to an end user.
    pub fn public_message(&self) -> &'static str {
        match self {
            QueryError::NotFound(_) => "Resource not found",
            QueryError::Unavailable(_) | QueryError::DeadlineExceeded { .. } => {
                "Service temporarily unavailable"
            }
            QueryError::InvalidCursor(_) => "Invalid cursor",
        }
    }
}

impl From<CacheError> for QueryError {
    fn from(error: CacheError) -> Self {
        QueryError::Unavailable(Box::new(error))
    }
}

impl From<SourceError> for QueryError {
    fn from(error: SourceError) -> Self {
        QueryError::Unavailable(Box::new(error))
    }
}

/// Failures while applying an event to the cache.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Store trouble; the same event may succeed when redelivered.
    #[error("applying `{kind}` failed transiently")]
    Retryable {
        kind: &'static str,
        #[source]
        source: CacheError,
    },
    /// The event can never be applied as given.
    #[error("event `{kind}` rejected")]
    Rejected {
        kind: &'static str,
        #[source]
        source: CacheError,
    },
}

impl ProjectionError {
    pub fn from_cache(kind: &'static str, source: CacheError) -> Self {
        if source.is_retryable() {
            ProjectionError::Retryable { kind, source }
        } else {
            ProjectionError::Rejected { kind, source }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProjectionError::Retryable { .. })
    }
}
