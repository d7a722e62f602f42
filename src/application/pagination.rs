//! Offset and cursor pagination shapes.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct IdCursorPayload {
    id: i64,
}

/// Opaque cursor naming the last id a client has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdCursor {
    id: i64,
}

impl IdCursor {
    pub fn new(id: i64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn encode(&self) -> String {
        let payload = IdCursorPayload { id: self.id };
        let serialized =
            serde_json::to_vec(&payload).expect("serializing id cursor payload should succeed");
        URL_SAFE_NO_PAD.encode(serialized)
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let payload: IdCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(Self { id: payload.id })
    }
}

/// Cursor-aware pagination request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<C> {
    pub limit: u32,
    pub cursor: Option<C>,
}

impl<C> PageRequest<C> {
    pub fn new(limit: u32, cursor: Option<C>) -> Self {
        Self { limit, cursor }
    }
}

/// Cursor-aware page result.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }
}

/// One numbered page.
#[derive(Debug, Clone, Serialize)]
pub struct OffsetPage<T> {
    pub items: Vec<T>,
    /// 1-based page number actually served.
    pub page: u32,
    pub size: u32,
    /// Lower bound on the number of items in the whole list.
    pub total: u64,
}

impl<T> OffsetPage<T> {
    /// Offset of the first item of `page` (1-based; `0` reads as `1`).
    pub fn offset(page: u32, size: u32) -> u64 {
        u64::from(page.max(1) - 1) * u64::from(size)
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_cursor_is_url_safe() {
        let encoded = IdCursor::new(-42).encode();
        assert!(!encoded.contains(['+', '/', '=']));
        assert_eq!(IdCursor::decode(&encoded).expect("decoded").id(), -42);
    }

    #[test]
    fn decoding_invalid_cursor_reports_error() {
        let err = IdCursor::decode("not-base64!").expect_err("invalid cursor rejected");
        assert!(matches!(err, PaginationError::InvalidCursor(_)));

        let not_json = URL_SAFE_NO_PAD.encode(b"[1,2]");
        assert!(IdCursor::decode(&not_json).is_err());
    }

    #[test]
    fn offsets_treat_page_zero_as_first() {
        assert_eq!(OffsetPage::<()>::offset(0, 20), 0);
        assert_eq!(OffsetPage::<()>::offset(1, 20), 0);
        assert_eq!(OffsetPage::<()>::offset(3, 20), 40);
    }
}
