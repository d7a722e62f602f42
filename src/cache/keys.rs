//! Cache key definitions.
//!
//! Detail snapshots, idempotency markers, sorted indexes, and counters live
//! in separate namespaces of the same store so that each can expire or be
//! evicted independently.

use std::fmt;

use crate::domain::events::EventSubject;
use crate::domain::types::{BoardId, CategoryId, EntityClass, RankingMetric, RankingPeriod};

const DETAIL_PREFIX: &str = "detail";
const MARKER_PREFIX: &str = "marker";
const INDEX_PREFIX: &str = "index";
const COUNTER_PREFIX: &str = "counter";

/// Key of a serialized detail snapshot.
pub fn detail_key(entity: EntityClass, id: i64) -> String {
    format!("{}{id}", detail_key_prefix(entity))
}

/// Prefix shared by every detail key of `entity`.
pub fn detail_key_prefix(entity: EntityClass) -> String {
    format!("{DETAIL_PREFIX}:{}:", entity.as_str())
}

/// Identifies the idempotency marker guarding a stream of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKey {
    /// Events about one entity.
    Entity(EntityClass, i64),
    /// Snapshots of one ranking list.
    Ranking(RankingMetric, RankingPeriod),
}

impl GuardKey {
    pub fn to_key(&self) -> String {
        match self {
            GuardKey::Entity(entity, id) => format!("{MARKER_PREFIX}:{}:{id}", entity.as_str()),
            GuardKey::Ranking(metric, period) => format!(
                "{MARKER_PREFIX}:ranking:{}:{}",
                metric.as_str(),
                period.as_str()
            ),
        }
    }
}

impl From<EventSubject> for GuardKey {
    fn from(subject: EventSubject) -> Self {
        match subject {
            EventSubject::Entity(entity, id) => GuardKey::Entity(entity, id),
            EventSubject::Ranking(metric, period) => GuardKey::Ranking(metric, period),
        }
    }
}

impl fmt::Display for GuardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

/// Sorted index variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// All boards, most recent first.
    RecentBoards,
    /// Boards of one category, most recent first.
    CategoryBoards(CategoryId),
    /// Top boards for a metric over a period.
    Ranking(RankingMetric, RankingPeriod),
    /// Comments of one board, most recent first; size-bounded.
    BoardComments(BoardId),
}

impl IndexKey {
    pub fn to_key(&self) -> String {
        match self {
            IndexKey::RecentBoards => format!("{INDEX_PREFIX}:board:recent"),
            IndexKey::CategoryBoards(category) => {
                format!("{INDEX_PREFIX}:board:category:{category}")
            }
            IndexKey::Ranking(metric, period) => format!(
                "{INDEX_PREFIX}:ranking:{}:{}",
                metric.as_str(),
                period.as_str()
            ),
            IndexKey::BoardComments(board) => format!("{INDEX_PREFIX}:board:{board}:comments"),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

/// Named counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKey {
    TotalBoards,
    TotalComments,
    BoardComments(BoardId),
}

impl CounterKey {
    pub fn to_key(&self) -> String {
        match self {
            CounterKey::TotalBoards => format!("{COUNTER_PREFIX}:board:total"),
            CounterKey::TotalComments => format!("{COUNTER_PREFIX}:comment:total"),
            CounterKey::BoardComments(board) => format!("{COUNTER_PREFIX}:board:{board}:comments"),
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}
