//! Inbound domain events emitted by the command side.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entities::{BoardReadModel, CommentReadModel};
use super::types::{BoardId, CategoryId, CommentId, EntityClass, RankingMetric, RankingPeriod};

/// One mutation of the system of record, delivered at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumEvent {
    /// Producer-assigned identifier, used for logging only.
    pub event_id: Uuid,
    /// Producer timestamp in epoch milliseconds.
    pub event_ts: i64,
    #[serde(flatten)]
    pub kind: ForumEventKind,
}

impl ForumEvent {
    pub fn new(event_ts: i64, kind: ForumEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_ts,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForumEventKind {
    BoardCreated {
        board: BoardReadModel,
    },
    /// Carries the full next snapshot.
    BoardUpdated {
        board: BoardReadModel,
        #[serde(default)]
        previous_category_id: Option<CategoryId>,
    },
    BoardDeleted {
        board_id: BoardId,
        category_id: CategoryId,
    },
    /// Carries only the new view count; applied as a patch.
    BoardViewed {
        board_id: BoardId,
        view_count: i64,
    },
    /// Carries only the new like count; applied as a patch.
    BoardLikeChanged {
        board_id: BoardId,
        like_count: i64,
    },
    CommentCreated {
        comment: CommentReadModel,
    },
    CommentDeleted {
        comment_id: CommentId,
        board_id: BoardId,
    },
    /// A complete top-K snapshot from the ranking aggregator.
    RankingRefreshed {
        metric: RankingMetric,
        period: RankingPeriod,
        entries: Vec<RankingEntry>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub board_id: BoardId,
    pub score: f64,
}

/// What an event is about, for guard selection and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSubject {
    Entity(EntityClass, i64),
    Ranking(RankingMetric, RankingPeriod),
}

impl ForumEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            ForumEventKind::BoardCreated { .. } => "board_created",
            ForumEventKind::BoardUpdated { .. } => "board_updated",
            ForumEventKind::BoardDeleted { .. } => "board_deleted",
            ForumEventKind::BoardViewed { .. } => "board_viewed",
            ForumEventKind::BoardLikeChanged { .. } => "board_like_changed",
            ForumEventKind::CommentCreated { .. } => "comment_created",
            ForumEventKind::CommentDeleted { .. } => "comment_deleted",
            ForumEventKind::RankingRefreshed { .. } => "ranking_refreshed",
        }
    }

    pub fn subject(&self) -> EventSubject {
        match self {
            ForumEventKind::BoardCreated { board } | ForumEventKind::BoardUpdated { board, .. } => {
                EventSubject::Entity(EntityClass::Board, board.board_id)
            }
            ForumEventKind::BoardDeleted { board_id, .. }
            | ForumEventKind::BoardViewed { board_id, .. }
            | ForumEventKind::BoardLikeChanged { board_id, .. } => {
                EventSubject::Entity(EntityClass::Board, *board_id)
            }
            ForumEventKind::CommentCreated { comment } => {
                EventSubject::Entity(EntityClass::Comment, comment.comment_id)
            }
            ForumEventKind::CommentDeleted { comment_id, .. } => {
                EventSubject::Entity(EntityClass::Comment, *comment_id)
            }
            ForumEventKind::RankingRefreshed { metric, period, .. } => {
                EventSubject::Ranking(*metric, *period)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_json_line() {
        let line = r#"{
            "event_id": "6f1c1f4e-8a5e-4b8e-9a53-1d2f3c4b5a69",
            "event_ts": 150,
            "type": "board_viewed",
            "board_id": 9,
            "view_count": 12
        }"#;
        let event: ForumEvent = serde_json::from_str(line).expect("decode event");

        assert_eq!(event.event_ts, 150);
        assert_eq!(
            event.kind,
            ForumEventKind::BoardViewed {
                board_id: 9,
                view_count: 12
            }
        );
        assert_eq!(
            event.kind.subject(),
            EventSubject::Entity(EntityClass::Board, 9)
        );
        assert_eq!(event.kind.name(), "board_viewed");
    }

    #[test]
    fn ranking_subject_is_metric_and_period() {
        let kind = ForumEventKind::RankingRefreshed {
            metric: RankingMetric::Views,
            period: RankingPeriod::Daily,
            entries: vec![RankingEntry {
                board_id: 1,
                score: 10.0,
            }],
        };
        assert_eq!(
            kind.subject(),
            EventSubject::Ranking(RankingMetric::Views, RankingPeriod::Daily)
        );
    }
}
