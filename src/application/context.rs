//! Wiring of cache components over one store.

use std::sync::Arc;
use std::time::Duration;

use crate::application::consumer::EventConsumer;
use crate::application::forum::ForumQueries;
use crate::application::projector::ForumProjector;
use crate::application::query::QueryEngine;
use crate::application::queue::EventQueue;
use crate::application::source::{BoardScope, CommentScope, SourceOfTruth};
use crate::cache::{
    CacheClient, CacheConfig, Counters, DetailCache, IdempotencyGuard, KeyValueStore,
    MutationExecutor, SortedIndex,
};
use crate::domain::entities::{BoardReadModel, CommentReadModel};

/// Shared handles for both the event path and the query path.
#[derive(Clone)]
pub struct ReadSideContext {
    config: CacheConfig,
    executor: MutationExecutor,
    boards: DetailCache<BoardReadModel>,
    comments: DetailCache<CommentReadModel>,
    index: SortedIndex,
    counters: Counters,
}

impl ReadSideContext {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        let client = CacheClient::new(store, config.store_op_timeout());
        let guard = IdempotencyGuard::new(client.clone(), config.marker_ttl());
        Self {
            executor: MutationExecutor::new(client.clone(), guard),
            boards: DetailCache::new(client.clone(), config.detail_ttl()),
            comments: DetailCache::new(client.clone(), config.detail_ttl()),
            index: SortedIndex::new(client.clone()),
            counters: Counters::new(client),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn executor(&self) -> &MutationExecutor {
        &self.executor
    }

    pub fn board_details(&self) -> &DetailCache<BoardReadModel> {
        &self.boards
    }

    pub fn comment_details(&self) -> &DetailCache<CommentReadModel> {
        &self.comments
    }

    pub fn index(&self) -> &SortedIndex {
        &self.index
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn projector(&self) -> ForumProjector {
        ForumProjector::new(
            self.executor.clone(),
            self.boards.clone(),
            self.comments.clone(),
            self.config.clone(),
        )
    }

    pub fn consumer(&self, queue: Arc<EventQueue>, batch_limit: usize) -> EventConsumer {
        EventConsumer::new(self.projector(), queue, batch_limit)
    }

    pub fn engine<S>(&self, source: Arc<S>, detail: DetailCache<S::Record>) -> QueryEngine<S>
    where
        S: SourceOfTruth,
    {
        QueryEngine::new(
            source,
            detail,
            self.index.clone(),
            self.counters.clone(),
            self.executor.clone(),
        )
    }

    /// Board and comment queries over the given sources.
    pub fn queries<B, C>(
        &self,
        boards: Arc<B>,
        comments: Arc<C>,
        default_page_size: u32,
        deadline: Option<Duration>,
    ) -> ForumQueries<B, C>
    where
        B: SourceOfTruth<Record = BoardReadModel, Scope = BoardScope>,
        C: SourceOfTruth<Record = CommentReadModel, Scope = CommentScope>,
    {
        let queries = ForumQueries::new(
            self.engine(boards, self.boards.clone()),
            self.engine(comments, self.comments.clone()),
            self.index.clone(),
            self.counters.clone(),
            default_page_size,
        );
        match deadline {
            Some(deadline) => queries.with_deadline(deadline),
            None => queries,
        }
    }
}
