//! Shared domain enumerations used in cache keys and event payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

pub type BoardId = i64;
pub type CommentId = i64;
pub type CategoryId = i64;
pub type WriterId = i64;

/// Entity classes that own a detail snapshot and an idempotency marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Board,
    Comment,
}

impl EntityClass {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityClass::Board => "board",
            EntityClass::Comment => "comment",
        }
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric a ranking list is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMetric {
    Views,
    Likes,
    Comments,
}

impl RankingMetric {
    pub const ALL: [RankingMetric; 3] = [
        RankingMetric::Views,
        RankingMetric::Likes,
        RankingMetric::Comments,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RankingMetric::Views => "views",
            RankingMetric::Likes => "likes",
            RankingMetric::Comments => "comments",
        }
    }
}

/// Aggregation window of a ranking list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl RankingPeriod {
    pub const ALL: [RankingPeriod; 3] = [
        RankingPeriod::Daily,
        RankingPeriod::Weekly,
        RankingPeriod::Monthly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RankingPeriod::Daily => "daily",
            RankingPeriod::Weekly => "weekly",
            RankingPeriod::Monthly => "monthly",
        }
    }
}
