//! Read model snapshots served by the query side.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;

use super::types::{BoardId, CategoryId, CommentId, EntityClass, WriterId};

/// A denormalized projection stored as one serialized blob per entity.
///
/// Snapshots are replaced wholesale; a patch reads the current snapshot,
/// builds the next one, and writes it back in full.
pub trait ReadModel: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Entity class used to namespace detail keys and idempotency markers.
    const ENTITY: EntityClass;

    fn id(&self) -> i64;

    /// Millisecond timestamp of the event that produced this snapshot.
    ///
    /// Snapshots fetched from the system of record carry `0`.
    fn event_ts(&self) -> i64;

    fn with_event_ts(self, event_ts: i64) -> Self;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardReadModel {
    pub board_id: BoardId,
    pub title: String,
    pub content: String,
    pub category_id: CategoryId,
    pub writer_id: WriterId,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub event_ts: i64,
}

impl ReadModel for BoardReadModel {
    const ENTITY: EntityClass = EntityClass::Board;

    fn id(&self) -> i64 {
        self.board_id
    }

    fn event_ts(&self) -> i64 {
        self.event_ts
    }

    fn with_event_ts(mut self, event_ts: i64) -> Self {
        self.event_ts = event_ts;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentReadModel {
    pub comment_id: CommentId,
    pub board_id: BoardId,
    pub parent_comment_id: Option<CommentId>,
    pub content: String,
    pub writer_id: WriterId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub event_ts: i64,
}

impl ReadModel for CommentReadModel {
    const ENTITY: EntityClass = EntityClass::Comment;

    fn id(&self) -> i64 {
        self.comment_id
    }

    fn event_ts(&self) -> i64 {
        self.event_ts
    }

    fn with_event_ts(mut self, event_ts: i64) -> Self {
        self.event_ts = event_ts;
        self
    }
}

/// Sorted-index score for a creation time (epoch milliseconds).
pub fn recency_score(created_at: OffsetDateTime) -> f64 {
    (created_at.unix_timestamp_nanos() / 1_000_000) as f64
}
