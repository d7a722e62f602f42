//! Contracts for the durable system of record.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::{CounterKey, IndexKey};
use crate::domain::entities::ReadModel;
use crate::domain::types::{BoardId, CategoryId};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("database timeout")]
    Timeout,
}

impl SourceError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// A listing that has a cached sorted index counterpart.
pub trait IndexedScope: Copy + fmt::Debug + Send + Sync + 'static {
    fn index_key(&self) -> IndexKey;

    /// Counter tracking the full upstream size of the listing, if any.
    fn total_counter(&self) -> Option<CounterKey>;

    /// Low-cardinality label for logs and metrics.
    fn label(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardScope {
    Recent,
    Category(CategoryId),
}

impl IndexedScope for BoardScope {
    fn index_key(&self) -> IndexKey {
        match self {
            BoardScope::Recent => IndexKey::RecentBoards,
            BoardScope::Category(category) => IndexKey::CategoryBoards(*category),
        }
    }

    fn total_counter(&self) -> Option<CounterKey> {
        match self {
            BoardScope::Recent => Some(CounterKey::TotalBoards),
            BoardScope::Category(_) => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            BoardScope::Recent => "boards_recent",
            BoardScope::Category(_) => "boards_category",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentScope {
    Board(BoardId),
}

impl IndexedScope for CommentScope {
    fn index_key(&self) -> IndexKey {
        match self {
            CommentScope::Board(board) => IndexKey::BoardComments(*board),
        }
    }

    fn total_counter(&self) -> Option<CounterKey> {
        match self {
            CommentScope::Board(board) => Some(CounterKey::BoardComments(*board)),
        }
    }

    fn label(&self) -> &'static str {
        "board_comments"
    }
}

/// Read access to the system of record for one read model.
///
/// Listings must be ordered the same way as the matching cached index:
/// newest first, ties broken by the higher id. Not-found is reported as an
/// empty result, never as an error.
#[async_trait]
pub trait SourceOfTruth: Send + Sync + 'static {
    type Record: ReadModel;
    type Scope: IndexedScope;

    async fn fetch_by_id(&self, id: i64) -> Result<Option<Self::Record>, SourceError>;

    /// Records for whichever of `ids` exist, in any order.
    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<Self::Record>, SourceError>;

    /// Ids on `page` (1-based) of the listing.
    async fn fetch_ids_by_page(
        &self,
        scope: Self::Scope,
        page: u32,
        size: u32,
    ) -> Result<Vec<i64>, SourceError>;

    /// Up to `limit` ids following `last_id`, or from the head when `None`.
    async fn fetch_ids_after(
        &self,
        scope: Self::Scope,
        last_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<i64>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_recent_boards_have_a_total_counter() {
        assert_eq!(
            BoardScope::Recent.total_counter(),
            Some(CounterKey::TotalBoards)
        );
        assert_eq!(BoardScope::Category(3).total_counter(), None);
        assert_eq!(
            BoardScope::Category(3).index_key(),
            IndexKey::CategoryBoards(3)
        );
        assert_eq!(
            CommentScope::Board(9).total_counter(),
            Some(CounterKey::BoardComments(9))
        );
    }
}
