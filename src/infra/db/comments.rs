use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::application::source::{CommentScope, SourceError, SourceOfTruth};
use crate::domain::entities::CommentReadModel;

use super::util::{map_sqlx_error, page_offset, recency_after, recency_order};

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: i64,
    board_id: i64,
    parent_id: Option<i64>,
    content: String,
    writer_id: i64,
    created_at: OffsetDateTime,
}

impl From<CommentRow> for CommentReadModel {
    fn from(row: CommentRow) -> Self {
        Self {
            comment_id: row.id,
            board_id: row.board_id,
            parent_comment_id: row.parent_id,
            content: row.content,
            writer_id: row.writer_id,
            created_at: row.created_at,
            event_ts: 0,
        }
    }
}

#[derive(Clone)]
pub struct PostgresComments {
    pool: Arc<PgPool>,
}

impl PostgresComments {
    pub(super) fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    fn push_scope(qb: &mut QueryBuilder<'_, Postgres>, scope: CommentScope) {
        let CommentScope::Board(board_id) = scope;
        qb.push(" WHERE c.deleted_at IS NULL AND c.board_id = ")
            .push_bind(board_id);
    }
}

#[async_trait]
impl SourceOfTruth for PostgresComments {
    type Record = CommentReadModel;
    type Scope = CommentScope;

    async fn fetch_by_id(&self, id: i64) -> Result<Option<CommentReadModel>, SourceError> {
        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT c.id, c.board_id, c.parent_id, c.content, c.writer_id, c.created_at
            FROM comments c
            WHERE c.id = $1 AND c.deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(CommentReadModel::from))
    }

    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<CommentReadModel>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT c.id, c.board_id, c.parent_id, c.content, c.writer_id, c.created_at
            FROM comments c
            WHERE c.id = ANY($1) AND c.deleted_at IS NULL
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(CommentReadModel::from).collect())
    }

    async fn fetch_ids_by_page(
        &self,
        scope: CommentScope,
        page: u32,
        size: u32,
    ) -> Result<Vec<i64>, SourceError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT c.id FROM comments c");
        Self::push_scope(&mut qb, scope);
        qb.push(recency_order("c"))
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
        scope: CommentScope,
        last_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<i64>, SourceError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT c.id FROM comments c");
        Self::push_scope(&mut qb, scope);
        if let Some(last_id) = last_id {
            qb.push(recency_after("c", "comments"))
                .push_bind(last_id)
                .push(")");
        }
        qb.push(recency_order("c"))
            .push(" LIMIT ")
            .push_bind(i64::from(limit));

        qb.build_query_scalar::<i64>()
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)
    }
}
