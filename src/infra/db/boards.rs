use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::application::source::{BoardScope, SourceError, SourceOfTruth};
use crate::domain::entities::BoardReadModel;

use super::util::{map_sqlx_error, page_offset, recency_after, recency_order};

const BOARD_SELECT: &str = "SELECT b.id, b.title, b.content, b.category_id, b.writer_id, \
    b.view_count, b.like_count, \
    (SELECT COUNT(*) FROM comments c WHERE c.board_id = b.id AND c.deleted_at IS NULL) AS comment_count, \
    b.created_at, b.updated_at \
    FROM boards b";

#[derive(sqlx::FromRow)]
struct BoardRow {
    id: i64,
    title: String,
    content: String,
    category_id: i64,
    writer_id: i64,
    view_count: i64,
    like_count: i64,
    comment_count: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<BoardRow> for BoardReadModel {
    fn from(row: BoardRow) -> Self {
        Self {
            board_id: row.id,
            title: row.title,
            content: row.content,
            category_id: row.category_id,
            writer_id: row.writer_id,
            view_count: row.view_count,
            like_count: row.like_count,
            comment_count: row.comment_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
            event_ts: 0,
        }
    }
}

#[derive(Clone)]
pub struct PostgresBoards {
    pool: Arc<PgPool>,
}

impl PostgresBoards {
    pub(super) fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    fn push_scope(qb: &mut QueryBuilder<'_, Postgres>, scope: BoardScope) {
        qb.push(" WHERE b.deleted_at IS NULL");
        if let BoardScope::Category(category) = scope {
            qb.push(" AND b.category_id = ").push_bind(category);
        }
    }
}

#[async_trait]
impl SourceOfTruth for PostgresBoards {
    type Record = BoardReadModel;
    type Scope = BoardScope;

    async fn fetch_by_id(&self, id: i64) -> Result<Option<BoardReadModel>, SourceError> {
        let mut qb = QueryBuilder::<Postgres>::new(BOARD_SELECT);
        qb.push(" WHERE b.deleted_at IS NULL AND b.id = ")
            .push_bind(id);

        let row = qb
            .build_query_as::<BoardRow>()
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(BoardReadModel::from))
    }

    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<BoardReadModel>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Postgres>::new(BOARD_SELECT);
        qb.push(" WHERE b.deleted_at IS NULL AND b.id = ANY(")
            .push_bind(ids.to_vec())
            .push(")");

        let rows = qb
            .build_query_as::<BoardRow>()
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(BoardReadModel::from).collect())
    }

    async fn fetch_ids_by_page(
        &self,
        scope: BoardScope,
        page: u32,
        size: u32,
    ) -> Result<Vec<i64>, SourceError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT b.id FROM boards b");
        Self::push_scope(&mut qb, scope);
        qb.push(recency_order("b"))
            .push(" LIMIT ")
            .push_bind(i64::from(size))
            .push(" OFFSET ")
            .push_bind(page_offset(page, size));

        qb.build_query_scalar::<i64>()
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)
    }

    async fn fetch_ids_after(
        &self,
        scope: BoardScope,
        last_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<i64>, SourceError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT b.id FROM boards b");
        Self::push_scope(&mut qb, scope);
        // An unknown cursor id yields a NULL row comparison and an empty slice.
        if let Some(last_id) = last_id {
            qb.push(recency_after("b", "boards"))
                .push_bind(last_id)
                .push(")");
        }
        qb.push(recency_order("b"))
            .push(" LIMIT ")
            .push_bind(i64::from(limit));

        qb.build_query_scalar::<i64>()
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)
    }
}
