//! Per-entity idempotency markers.
//!
//! A marker records the timestamp of the last event applied for a subject.
//! An event is applied only when its timestamp is strictly greater than the
//! marker; a missing marker counts as zero. The authoritative check runs
//! inside the mutation bundle; the reads here are advisory.

use std::time::Duration;

use super::client::CacheClient;
use super::error::CacheError;
use super::keys::GuardKey;
use super::mutation::GuardClause;

#[derive(Clone)]
pub struct IdempotencyGuard {
    client: CacheClient,
    marker_ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(client: CacheClient, marker_ttl: Duration) -> Self {
        Self { client, marker_ttl }
    }

    /// Check-and-commit clause to embed in a bundle for this subject.
    pub fn clause(&self, key: GuardKey, incoming_ts: i64) -> GuardClause {
        GuardClause {
            marker_key: key.to_key(),
            incoming_ts,
            ttl: self.marker_ttl,
        }
    }

    /// Timestamp of the last applied event, or `None` when no marker exists.
    pub async fn last_applied(&self, key: GuardKey) -> Result<Option<i64>, CacheError> {
        let values = self.client.get_integers(&[key.to_key()]).await?;
        Ok(values.into_iter().next().flatten())
    }

    /// Whether an event with `incoming_ts` would currently be admitted.
    pub async fn accepts(&self, key: GuardKey, incoming_ts: i64) -> Result<bool, CacheError> {
        let last = self.last_applied(key).await?;
        Ok(self.clause(key, incoming_ts).admits(last))
    }
}
