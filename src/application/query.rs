//! Cache-aside reads with source-of-truth fallback.
//!
//! Every listing follows the same steps:
//!
//! 1. Read ids from the scope's sorted index.
//! 2. When the index comes up short, ask the source for the same page or
//!    cursor position. Cache counters never stand in for this check.
//! 3. Merge both id lists, cache ids first, dropping duplicates and cutting
//!    at the requested size.
//! 4. Resolve details from the cache, fetch the rest from the source, and
//!    warm the cache with what was fetched.
//!
//! Warm-up writes are put-if-absent, so a snapshot fetched here never
//! replaces one written by a newer event, and they travel as one bundle, so
//! a query cancelled by its deadline leaves either all of them or none.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::application::error::QueryError;
use crate::application::pagination::OffsetPage;
use crate::application::source::{IndexedScope, SourceOfTruth};
use crate::cache::{Counters, DetailCache, MutationExecutor, SortedIndex};
use crate::domain::entities::ReadModel;
use crate::domain::error::DomainError;

const METRIC_QUERY_FALLBACK: &str = "corkboard_query_fallback_total";

/// Items following a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorSlice<T> {
    pub items: Vec<T>,
    /// Id to resume from; `None` when the slice came back short.
    pub next: Option<i64>,
}

pub struct QueryEngine<S: SourceOfTruth> {
    source: Arc<S>,
    detail: DetailCache<S::Record>,
    index: SortedIndex,
    counters: Counters,
    executor: MutationExecutor,
    deadline: Option<Duration>,
}

impl<S: SourceOfTruth> Clone for QueryEngine<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            detail: self.detail.clone(),
            index: self.index.clone(),
            counters: self.counters.clone(),
            executor: self.executor.clone(),
            deadline: self.deadline,
        }
    }
}

impl<S: SourceOfTruth> QueryEngine<S> {
    pub fn new(
        source: Arc<S>,
        detail: DetailCache<S::Record>,
        index: SortedIndex,
        counters: Counters,
        executor: MutationExecutor,
    ) -> Self {
        Self {
            source,
            detail,
            index,
            counters,
            executor,
            deadline: None,
        }
    }

    /// A copy of this engine whose queries fail after `deadline`.
    pub fn with_deadline(&self, deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn detail(&self) -> &DetailCache<S::Record> {
        &self.detail
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<S::Record, QueryError> {
        self.bounded(self.get_inner(id)).await
    }

    /// Page `page` (1-based) of `size` items in `scope`.
    #[instrument(skip(self))]
    pub async fn list_page(
        &self,
        scope: S::Scope,
        page: u32,
        size: u32,
    ) -> Result<OffsetPage<S::Record>, QueryError> {
        self.bounded(self.list_page_inner(scope, page, size)).await
    }

    /// Up to `limit` items after `last_id`, or from the head when `None`.
    #[instrument(skip(self))]
    pub async fn list_after(
        &self,
        scope: S::Scope,
        last_id: Option<i64>,
        limit: u32,
    ) -> Result<CursorSlice<S::Record>, QueryError> {
        self.bounded(self.list_after_inner(scope, last_id, limit))
            .await
    }

    /// Details for `ids` in order; ids unknown everywhere are dropped.
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn resolve(&self, ids: &[i64]) -> Result<Vec<S::Record>, QueryError> {
        self.bounded(self.resolve_inner(ids)).await
    }

    async fn get_inner(&self, id: i64) -> Result<S::Record, QueryError> {
        if let Some(model) = self.detail.get(id).await? {
            return Ok(model);
        }
        let Some(model) = self.source.fetch_by_id(id).await? else {
            return Err(DomainError::not_found(<S::Record as ReadModel>::ENTITY, id).into());
        };
        self.warm(std::slice::from_ref(&model)).await;
        Ok(model)
    }

    async fn list_page_inner(
        &self,
        scope: S::Scope,
        page: u32,
        size: u32,
    ) -> Result<OffsetPage<S::Record>, QueryError> {
        let page = page.max(1);
        let offset = OffsetPage::<S::Record>::offset(page, size);
        let cached = self
            .index
            .read_by_offset(scope.index_key(), page, size)
            .await?;
        let upstream_total = match scope.total_counter() {
            Some(key) => self.counters.peek(key).await?,
            None => None,
        };

        // Counters only reflect applied events; any short page asks the source.
        let ids = if cached.ids.len() < size as usize {
            counter!(METRIC_QUERY_FALLBACK, "query" => "page").increment(1);
            let fetched = self.source.fetch_ids_by_page(scope, page, size).await?;
            debug!(
                scope = scope.label(),
                cached = cached.ids.len(),
                fetched = fetched.len(),
                "Offset page fell back to source"
            );
            merge_ids(&cached.ids, &fetched, size as usize)
        } else {
            cached.ids
        };

        let items = self.resolve_inner(&ids).await?;
        let total = cached
            .total
            .max(upstream_total.unwrap_or(0).max(0) as u64)
            .max(offset + items.len() as u64);

        Ok(OffsetPage {
            items,
            page,
            size,
            total,
        })
    }

    async fn list_after_inner(
        &self,
        scope: S::Scope,
        last_id: Option<i64>,
        limit: u32,
    ) -> Result<CursorSlice<S::Record>, QueryError> {
        let limit_len = limit as usize;
        let slice = self
            .index
            .read_by_cursor(scope.index_key(), last_id, limit)
            .await?;

        let ids = if !slice.cursor_found || slice.ids.len() < limit_len {
            counter!(METRIC_QUERY_FALLBACK, "query" => "cursor").increment(1);
            let fetched = self.source.fetch_ids_after(scope, last_id, limit).await?;
            debug!(
                scope = scope.label(),
                cursor_found = slice.cursor_found,
                cached = slice.ids.len(),
                fetched = fetched.len(),
                "Cursor slice fell back to source"
            );
            merge_ids(&slice.ids, &fetched, limit_len)
        } else {
            slice.ids
        };

        let items = self.resolve_inner(&ids).await?;
        let next = if limit_len > 0 && items.len() == limit_len {
            items.last().map(|model| model.id())
        } else {
            None
        };
        Ok(CursorSlice { items, next })
    }

    async fn resolve_inner(&self, ids: &[i64]) -> Result<Vec<S::Record>, QueryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut found = self.detail.get_many(ids).await?;
        let missing: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| !found.contains_key(id))
            .collect();

        if !missing.is_empty() {
            let fetched = self.source.fetch_by_ids(&missing).await?;
            self.warm(&fetched).await;
            let missing: HashSet<i64> = missing.into_iter().collect();
            found.extend(
                fetched
                    .into_iter()
                    .filter(|model| missing.contains(&model.id()))
                    .map(|model| (model.id(), model)),
            );
        }

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    /// Populate the detail cache with snapshots fetched from the source.
    ///
    /// Failures are logged; the caller already holds the data it needs.
    async fn warm(&self, models: &[S::Record]) {
        if models.is_empty() {
            return;
        }
        let mutations = match models
            .iter()
            .map(|model| self.detail.populate_mutation(model))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(mutations) => mutations,
            Err(err) => {
                warn!(error = %err, "Skipping cache warm-up");
                return;
            }
        };
        if let Err(err) = self.executor.apply_unguarded(mutations).await {
            warn!(error = %err, count = models.len(), "Cache warm-up failed");
        }
    }

    async fn bounded<T, F>(&self, query: F) -> Result<T, QueryError>
    where
        F: Future<Output = Result<T, QueryError>>,
    {
        let Some(deadline) = self.deadline else {
            return query.await;
        };
        match tokio::time::timeout(deadline, query).await {
            Ok(result) => result,
            Err(_) => {
                let deadline_ms = deadline.as_millis() as u64;
                warn!(deadline_ms, "Query abandoned at deadline");
                Err(QueryError::DeadlineExceeded { deadline_ms })
            }
        }
    }
}

/// Cache ids first, then unseen source ids, capped at `limit`.
pub fn merge_ids(cached: &[i64], fetched: &[i64], limit: usize) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(cached.len() + fetched.len());
    cached
        .iter()
        .chain(fetched)
        .copied()
        .filter(|id| seen.insert(*id))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_cache_order_and_drops_duplicates() {
        assert_eq!(merge_ids(&[9, 7], &[9, 8, 7, 6], 10), vec![9, 7, 8, 6]);
    }

    #[test]
    fn merge_truncates_to_limit() {
        assert_eq!(merge_ids(&[5, 4, 3], &[2, 1], 4), vec![5, 4, 3, 2]);
        assert!(merge_ids(&[1], &[2], 0).is_empty());
    }

    #[test]
    fn merge_dedupes_within_one_side() {
        assert_eq!(merge_ids(&[], &[3, 3, 2], 5), vec![3, 2]);
    }
}
