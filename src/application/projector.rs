//! Turns forum events into cache bundles.
//!
//! Every event maps to exactly one bundle guarded by the marker of its
//! subject, so re-delivered or out-of-order events are skipped as a whole.
//! View and like events carry a single field and are applied as patches of
//! the cached board snapshot.

use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::application::error::ProjectionError;
use crate::cache::{
    ApplyOutcome, CacheConfig, CacheError, CacheMutation, CounterKey, Counters, DetailCache,
    GuardKey, IndexKey, MutationExecutor, SortedIndex,
};
use crate::domain::entities::{BoardReadModel, CommentReadModel, ReadModel, recency_score};
use crate::domain::events::{ForumEvent, ForumEventKind, RankingEntry};
use crate::domain::types::{BoardId, CategoryId, CommentId, RankingMetric, RankingPeriod};

const METRIC_EVENT_TOTAL: &str = "corkboard_event_total";

#[derive(Clone)]
pub struct ForumProjector {
    executor: MutationExecutor,
    boards: DetailCache<BoardReadModel>,
    comments: DetailCache<CommentReadModel>,
    config: CacheConfig,
}

impl ForumProjector {
    pub fn new(
        executor: MutationExecutor,
        boards: DetailCache<BoardReadModel>,
        comments: DetailCache<CommentReadModel>,
        config: CacheConfig,
    ) -> Self {
        Self {
            executor,
            boards,
            comments,
            config,
        }
    }

    /// Apply one event to every cache structure it touches.
    #[instrument(
        skip(self, event),
        fields(event_id = %event.event_id, kind = event.kind.name(), event_ts = event.event_ts)
    )]
    pub async fn apply(&self, event: &ForumEvent) -> Result<ApplyOutcome, ProjectionError> {
        let kind = event.kind.name();
        match self.dispatch(event).await {
            Ok(outcome) => {
                counter!(METRIC_EVENT_TOTAL, "kind" => kind, "outcome" => outcome.as_str())
                    .increment(1);
                debug!(outcome = outcome.as_str(), "Event projected");
                Ok(outcome)
            }
            Err(err) => {
                let err = ProjectionError::from_cache(kind, err);
                let outcome = if err.is_retryable() {
                    "retryable"
                } else {
                    "rejected"
                };
                counter!(METRIC_EVENT_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
                warn!(error = %err, outcome, "Event projection failed");
                Err(err)
            }
        }
    }

    async fn dispatch(&self, event: &ForumEvent) -> Result<ApplyOutcome, CacheError> {
        let guard = GuardKey::from(event.kind.subject());
        let ts = event.event_ts;
        match &event.kind {
            ForumEventKind::BoardCreated { board } => {
                let mutations = self.board_created(board, ts)?;
                self.executor.apply(guard, ts, mutations).await
            }
            ForumEventKind::BoardUpdated {
                board,
                previous_category_id,
            } => {
                let mutations = self.board_updated(board, *previous_category_id, ts)?;
                self.executor.apply(guard, ts, mutations).await
            }
            ForumEventKind::BoardDeleted {
                board_id,
                category_id,
            } => {
                let mutations = self.board_deleted(*board_id, *category_id);
                self.executor.apply(guard, ts, mutations).await
            }
            ForumEventKind::BoardViewed {
                board_id,
                view_count,
            } => {
                let view_count = *view_count;
                self.executor
                    .apply_read_modify_write(
                        guard,
                        ts,
                        &self.boards,
                        *board_id,
                        move |board| board.view_count = view_count,
                        Vec::new(),
                    )
                    .await
            }
            ForumEventKind::BoardLikeChanged {
                board_id,
                like_count,
            } => {
                let like_count = *like_count;
                self.executor
                    .apply_read_modify_write(
                        guard,
                        ts,
                        &self.boards,
                        *board_id,
                        move |board| board.like_count = like_count,
                        Vec::new(),
                    )
                    .await
            }
            ForumEventKind::CommentCreated { comment } => {
                let mutations = self.comment_created(comment, ts)?;
                self.executor.apply(guard, ts, mutations).await
            }
            ForumEventKind::CommentDeleted {
                comment_id,
                board_id,
            } => {
                let mutations = self.comment_deleted(*comment_id, *board_id);
                self.executor.apply(guard, ts, mutations).await
            }
            ForumEventKind::RankingRefreshed {
                metric,
                period,
                entries,
            } => {
                let mutations = self.ranking_refreshed(*metric, *period, entries);
                self.executor.apply(guard, ts, mutations).await
            }
        }
    }

    fn board_created(
        &self,
        board: &BoardReadModel,
        ts: i64,
    ) -> Result<Vec<CacheMutation>, CacheError> {
        let mut mutations = self.board_upsert(board, ts)?;
        mutations.push(Counters::increment(CounterKey::TotalBoards));
        Ok(mutations)
    }

    fn board_updated(
        &self,
        board: &BoardReadModel,
        previous_category_id: Option<CategoryId>,
        ts: i64,
    ) -> Result<Vec<CacheMutation>, CacheError> {
        let mut mutations = self.board_upsert(board, ts)?;
        if let Some(previous) = previous_category_id
            && previous != board.category_id
        {
            mutations.push(SortedIndex::remove(
                IndexKey::CategoryBoards(previous),
                board.board_id,
            ));
        }
        Ok(mutations)
    }

    /// Snapshot write plus membership of the recency indexes.
    fn board_upsert(
        &self,
        board: &BoardReadModel,
        ts: i64,
    ) -> Result<Vec<CacheMutation>, CacheError> {
        let snapshot = board.clone().with_event_ts(ts);
        let score = recency_score(snapshot.created_at);
        let category = IndexKey::CategoryBoards(snapshot.category_id);
        Ok(vec![
            self.boards.put_mutation(&snapshot)?,
            SortedIndex::add(IndexKey::RecentBoards, snapshot.board_id, score),
            SortedIndex::trim_to_size(IndexKey::RecentBoards, self.config.recent_list_limit()),
            SortedIndex::add(category, snapshot.board_id, score),
            SortedIndex::trim_to_size(category, self.config.category_list_limit()),
        ])
    }

    fn board_deleted(&self, board_id: BoardId, category_id: CategoryId) -> Vec<CacheMutation> {
        let mut mutations = vec![
            self.boards.delete_mutation(board_id),
            SortedIndex::remove(IndexKey::RecentBoards, board_id),
            SortedIndex::remove(IndexKey::CategoryBoards(category_id), board_id),
        ];
        for metric in RankingMetric::ALL {
            for period in RankingPeriod::ALL {
                mutations.push(SortedIndex::remove(
                    IndexKey::Ranking(metric, period),
                    board_id,
                ));
            }
        }
        // Comment cleanup reads the per-board index and counter, so it runs
        // before they are dropped.
        let comments = IndexKey::BoardComments(board_id);
        let comment_count = CounterKey::BoardComments(board_id);
        mutations.extend([
            self.comments.delete_members_mutation(comments),
            Counters::subtract(CounterKey::TotalComments, comment_count),
            SortedIndex::delete(comments),
            Counters::delete(comment_count),
            Counters::decrement(CounterKey::TotalBoards),
        ]);
        mutations
    }

    fn comment_created(
        &self,
        comment: &CommentReadModel,
        ts: i64,
    ) -> Result<Vec<CacheMutation>, CacheError> {
        let snapshot = comment.clone().with_event_ts(ts);
        let index = IndexKey::BoardComments(snapshot.board_id);
        Ok(vec![
            self.comments.put_mutation(&snapshot)?,
            SortedIndex::add(
                index,
                snapshot.comment_id,
                recency_score(snapshot.created_at),
            ),
            SortedIndex::trim_to_size(index, self.config.comment_list_limit()),
            Counters::increment(CounterKey::TotalComments),
            Counters::increment(CounterKey::BoardComments(snapshot.board_id)),
        ])
    }

    fn comment_deleted(&self, comment_id: CommentId, board_id: BoardId) -> Vec<CacheMutation> {
        vec![
            self.comments.delete_mutation(comment_id),
            SortedIndex::remove(IndexKey::BoardComments(board_id), comment_id),
            Counters::decrement(CounterKey::TotalComments),
            Counters::decrement(CounterKey::BoardComments(board_id)),
        ]
    }

    fn ranking_refreshed(
        &self,
        metric: RankingMetric,
        period: RankingPeriod,
        entries: &[RankingEntry],
    ) -> Vec<CacheMutation> {
        vec![SortedIndex::replace_all(
            IndexKey::Ranking(metric, period),
            top_entries(entries, self.config.ranking_list_limit()),
        )]
    }
}

/// Highest-scored `limit` entries; ties keep the higher board id. Later
/// duplicates of a board id win.
fn top_entries(entries: &[RankingEntry], limit: usize) -> Vec<(i64, f64)> {
    let mut by_board = std::collections::HashMap::with_capacity(entries.len());
    for entry in entries {
        by_board.insert(entry.board_id, entry.score);
    }
    let mut ranked: Vec<(i64, f64)> = by_board.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(b.0.cmp(&a.0)));
    ranked.truncate(limit);
    ranked
}
