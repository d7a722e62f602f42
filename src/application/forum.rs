//! Board, comment, and ranking reads for API callers.

use std::time::Duration;

use futures::try_join;
use serde::Serialize;
use tracing::instrument;

use crate::application::error::QueryError;
use crate::application::pagination::{CursorPage, IdCursor, OffsetPage, PageRequest};
use crate::application::query::{CursorSlice, QueryEngine};
use crate::application::source::{BoardScope, CommentScope, SourceOfTruth};
use crate::cache::{CounterKey, Counters, IndexKey, SortedIndex};
use crate::domain::entities::{BoardReadModel, CommentReadModel};
use crate::domain::types::{BoardId, CommentId, RankingMetric, RankingPeriod};

/// Site-wide totals tracked by counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForumTotals {
    pub boards: i64,
    pub comments: i64,
}

pub struct ForumQueries<B, C>
where
    B: SourceOfTruth<Record = BoardReadModel, Scope = BoardScope>,
    C: SourceOfTruth<Record = CommentReadModel, Scope = CommentScope>,
{
    boards: QueryEngine<B>,
    comments: QueryEngine<C>,
    index: SortedIndex,
    counters: Counters,
    default_page_size: u32,
}

impl<B, C> ForumQueries<B, C>
where
    B: SourceOfTruth<Record = BoardReadModel, Scope = BoardScope>,
    C: SourceOfTruth<Record = CommentReadModel, Scope = CommentScope>,
{
    pub fn new(
        boards: QueryEngine<B>,
        comments: QueryEngine<C>,
        index: SortedIndex,
        counters: Counters,
        default_page_size: u32,
    ) -> Self {
        Self {
            boards,
            comments,
            index,
            counters,
            default_page_size: default_page_size.max(1),
        }
    }

    /// Apply the same deadline to every board and comment query.
    pub fn with_deadline(self, deadline: Duration) -> Self {
        Self {
            boards: self.boards.with_deadline(deadline),
            comments: self.comments.with_deadline(deadline),
            ..self
        }
    }

    pub fn boards(&self) -> &QueryEngine<B> {
        &self.boards
    }

    pub fn comments(&self) -> &QueryEngine<C> {
        &self.comments
    }

    #[instrument(skip(self))]
    pub async fn board(&self, id: BoardId) -> Result<BoardReadModel, QueryError> {
        let (mut board, count) = try_join!(self.boards.get(id), async {
            self.counters
                .peek(CounterKey::BoardComments(id))
                .await
                .map_err(QueryError::from)
        })?;
        if let Some(count) = count {
            board.comment_count = count;
        }
        Ok(board)
    }

    #[instrument(skip(self))]
    pub async fn boards_page(
        &self,
        scope: BoardScope,
        page: u32,
        size: Option<u32>,
    ) -> Result<OffsetPage<BoardReadModel>, QueryError> {
        let size = size.unwrap_or(self.default_page_size);
        let mut page = self.boards.list_page(scope, page, size).await?;
        page.items = self.overlay_comment_counts(page.items).await?;
        Ok(page)
    }

    #[instrument(skip(self, request), fields(limit = request.limit))]
    pub async fn boards_after(
        &self,
        scope: BoardScope,
        request: PageRequest<IdCursor>,
    ) -> Result<CursorPage<BoardReadModel>, QueryError> {
        let slice = self
            .boards
            .list_after(scope, request.cursor.map(|c| c.id()), self.limit(request.limit))
            .await?;
        let CursorSlice { items, next } = slice;
        let items = self.overlay_comment_counts(items).await?;
        Ok(cursor_page(items, next))
    }

    #[instrument(skip(self))]
    pub async fn comment(&self, id: CommentId) -> Result<CommentReadModel, QueryError> {
        self.comments.get(id).await
    }

    #[instrument(skip(self))]
    pub async fn comments_page(
        &self,
        board: BoardId,
        page: u32,
        size: Option<u32>,
    ) -> Result<OffsetPage<CommentReadModel>, QueryError> {
        let size = size.unwrap_or(self.default_page_size);
        self.comments
            .list_page(CommentScope::Board(board), page, size)
            .await
    }

    #[instrument(skip(self, request), fields(limit = request.limit))]
    pub async fn comments_after(
        &self,
        board: BoardId,
        request: PageRequest<IdCursor>,
    ) -> Result<CursorPage<CommentReadModel>, QueryError> {
        let CursorSlice { items, next } = self
            .comments
            .list_after(
                CommentScope::Board(board),
                request.cursor.map(|c| c.id()),
                self.limit(request.limit),
            )
            .await?;
        Ok(cursor_page(items, next))
    }

    /// Top boards of a ranking list, best first.
    ///
    /// Rankings come only from the cached snapshot; the system of record is
    /// consulted for details but never for membership.
    #[instrument(skip(self))]
    pub async fn ranking(
        &self,
        metric: RankingMetric,
        period: RankingPeriod,
        limit: Option<u32>,
    ) -> Result<Vec<BoardReadModel>, QueryError> {
        let limit = limit.unwrap_or(self.default_page_size);
        let page = self
            .index
            .read_by_offset(IndexKey::Ranking(metric, period), 1, limit)
            .await?;
        let boards = self.boards.resolve(&page.ids).await?;
        self.overlay_comment_counts(boards).await
    }

    pub async fn totals(&self) -> Result<ForumTotals, QueryError> {
        let values = self
            .counters
            .get_many(&[CounterKey::TotalBoards, CounterKey::TotalComments])
            .await?;
        Ok(ForumTotals {
            boards: values.first().copied().unwrap_or(0),
            comments: values.get(1).copied().unwrap_or(0),
        })
    }

    fn limit(&self, requested: u32) -> u32 {
        if requested == 0 {
            self.default_page_size
        } else {
            requested
        }
    }

    /// Prefer the live per-board comment counter over the snapshot value.
    async fn overlay_comment_counts(
        &self,
        mut boards: Vec<BoardReadModel>,
    ) -> Result<Vec<BoardReadModel>, QueryError> {
        if boards.is_empty() {
            return Ok(boards);
        }
        let keys: Vec<CounterKey> = boards
            .iter()
            .map(|board| CounterKey::BoardComments(board.board_id))
            .collect();
        let counts = self.counters.peek_many(&keys).await?;
        for (board, count) in boards.iter_mut().zip(counts) {
            if let Some(count) = count {
                board.comment_count = count;
            }
        }
        Ok(boards)
    }
}

/// Build a cursor request from an optional opaque cursor string.
pub fn page_request(limit: u32, cursor: Option<&str>) -> Result<PageRequest<IdCursor>, QueryError> {
    let cursor = cursor.map(IdCursor::decode).transpose()?;
    Ok(PageRequest::new(limit, cursor))
}

fn cursor_page<T>(items: Vec<T>, next: Option<i64>) -> CursorPage<T> {
    CursorPage::new(items, next.map(|id| IdCursor::new(id).encode()))
}
