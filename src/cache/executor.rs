//! Atomic application of cache bundles.
//!
//! Two strategies reach the store:
//!
//! - **Script**: guard check, every write, guard commit and marker TTL
//!   refresh are evaluated server-side in one round trip.
//! - **Read-modify-write**: the current snapshot is read, patched on the
//!   client, and written back in one pipelined batch that carries the guard
//!   clause. Two writers for the same entity may interleave between read
//!   and write; whichever commits last wins, but a stale event never does.

use std::time::Instant;

use metrics::histogram;
use tracing::{debug, instrument};

use crate::domain::entities::ReadModel;

use super::client::CacheClient;
use super::detail::DetailCache;
use super::error::CacheError;
use super::guard::IdempotencyGuard;
use super::keys::GuardKey;
use super::mutation::{BundleResult, CacheMutation, MutationBundle};
use super::store::ExecutionStrategy;

const METRIC_BUNDLE_APPLY_MS: &str = "corkboard_bundle_apply_ms";

/// What happened to an event's bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The marker already holds an equal or newer timestamp.
    SkippedStale { last_applied_ts: i64 },
    /// A patch arrived for a snapshot that is not cached; nothing was written.
    SkippedUncached,
}

impl ApplyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyOutcome::Applied => "applied",
            ApplyOutcome::SkippedStale { .. } => "stale",
            ApplyOutcome::SkippedUncached => "uncached",
        }
    }
}

impl From<BundleResult> for ApplyOutcome {
    fn from(result: BundleResult) -> Self {
        match result {
            BundleResult::Applied => ApplyOutcome::Applied,
            BundleResult::Stale { last_applied_ts } => {
                ApplyOutcome::SkippedStale { last_applied_ts }
            }
        }
    }
}

#[derive(Clone)]
pub struct MutationExecutor {
    client: CacheClient,
    guard: IdempotencyGuard,
}

impl MutationExecutor {
    pub fn new(client: CacheClient, guard: IdempotencyGuard) -> Self {
        Self { client, guard }
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// Apply `mutations` under the marker for `guard_key` as one script.
    #[instrument(skip(self, mutations), fields(guard = %guard_key, mutations = mutations.len()))]
    pub async fn apply(
        &self,
        guard_key: GuardKey,
        event_ts: i64,
        mutations: Vec<CacheMutation>,
    ) -> Result<ApplyOutcome, CacheError> {
        let bundle = MutationBundle::guarded(self.guard.clause(guard_key, event_ts), mutations);
        let result = self.execute(&bundle, ExecutionStrategy::Script).await?;
        Ok(result.into())
    }

    /// Patch a cached snapshot and write it back together with `extra`.
    ///
    /// The patched snapshot is stamped with `event_ts`. When the snapshot is
    /// not cached the event is skipped without touching the marker, so a
    /// later full snapshot is not rejected.
    #[instrument(skip(self, detail, patch, extra), fields(guard = %guard_key))]
    pub async fn apply_read_modify_write<M, F>(
        &self,
        guard_key: GuardKey,
        event_ts: i64,
        detail: &DetailCache<M>,
        id: i64,
        patch: F,
        extra: Vec<CacheMutation>,
    ) -> Result<ApplyOutcome, CacheError>
    where
        M: ReadModel,
        F: FnOnce(&mut M) + Send,
    {
        if let Some(last_applied_ts) = self.guard.last_applied(guard_key).await?
            && event_ts <= last_applied_ts
        {
            debug!(last_applied_ts, "Advisory guard rejected stale patch");
            return Ok(ApplyOutcome::SkippedStale { last_applied_ts });
        }

        let Some(mut snapshot) = detail.get(id).await? else {
            debug!("Snapshot not cached; patch skipped");
            return Ok(ApplyOutcome::SkippedUncached);
        };

        patch(&mut snapshot);
        let snapshot = snapshot.with_event_ts(event_ts);

        let mut mutations = Vec::with_capacity(extra.len() + 1);
        mutations.push(detail.put_mutation(&snapshot)?);
        mutations.extend(extra);

        let bundle = MutationBundle::guarded(self.guard.clause(guard_key, event_ts), mutations);
        let result = self.execute(&bundle, ExecutionStrategy::Pipeline).await?;
        Ok(result.into())
    }

    /// Apply `mutations` without any marker (cache warm-up).
    #[instrument(skip(self, mutations), fields(mutations = mutations.len()))]
    pub async fn apply_unguarded(&self, mutations: Vec<CacheMutation>) -> Result<(), CacheError> {
        if mutations.is_empty() {
            return Ok(());
        }
        let bundle = MutationBundle::unguarded(mutations);
        self.execute(&bundle, ExecutionStrategy::Script).await?;
        Ok(())
    }

    async fn execute(
        &self,
        bundle: &MutationBundle,
        strategy: ExecutionStrategy,
    ) -> Result<BundleResult, CacheError> {
        let started_at = Instant::now();
        let result = self.client.execute(bundle, strategy).await;
        histogram!(METRIC_BUNDLE_APPLY_MS, "strategy" => strategy.as_str())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        result
    }
}
