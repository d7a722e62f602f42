//! Bundle vocabulary understood by every store backend.
//!
//! A bundle is applied entirely or not at all. When it carries a guard
//! clause, the clause is checked first and committed last within the same
//! atomic step.

use std::time::Duration;

/// One write inside a bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheMutation {
    /// Store a serialized detail snapshot.
    PutDetail {
        key: String,
        bytes: Vec<u8>,
        ttl: Option<Duration>,
        /// Leave an existing value untouched (cache warm-up).
        only_if_absent: bool,
    },
    /// Remove any value stored under the key.
    DeleteKey { key: String },
    /// Insert or rescore a sorted-index member.
    IndexAdd { index: String, member: i64, score: f64 },
    /// Remove a sorted-index member.
    IndexRemove { index: String, member: i64 },
    /// Evict the lowest-scored members beyond `max_size`.
    IndexTrim { index: String, max_size: usize },
    /// Clear the index and repopulate it with a full snapshot.
    IndexReplace {
        index: String,
        entries: Vec<(i64, f64)>,
    },
    /// Add `delta` to a counter, clamping the result at zero.
    CounterDelta { key: String, delta: i64 },
    /// Subtract the current value of counter `by_key` from `key`, clamping
    /// the result at zero.
    CounterSubtract { key: String, by_key: String },
    /// Delete `{key_prefix}{member}` for every member of `index`.
    DeleteIndexedKeys { index: String, key_prefix: String },
}

impl CacheMutation {
    pub fn kind(&self) -> &'static str {
        match self {
            CacheMutation::PutDetail { .. } => "put_detail",
            CacheMutation::DeleteKey { .. } => "delete_key",
            CacheMutation::IndexAdd { .. } => "index_add",
            CacheMutation::IndexRemove { .. } => "index_remove",
            CacheMutation::IndexTrim { .. } => "index_trim",
            CacheMutation::IndexReplace { .. } => "index_replace",
            CacheMutation::CounterDelta { .. } => "counter_delta",
            CacheMutation::CounterSubtract { .. } => "counter_subtract",
            CacheMutation::DeleteIndexedKeys { .. } => "delete_indexed_keys",
        }
    }
}

/// Idempotency check-and-commit evaluated inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardClause {
    pub marker_key: String,
    pub incoming_ts: i64,
    pub ttl: Duration,
}

impl GuardClause {
    /// An absent marker counts as timestamp zero; ties are stale.
    pub fn admits(&self, last_applied_ts: Option<i64>) -> bool {
        self.incoming_ts > last_applied_ts.unwrap_or(0)
    }
}

/// A set of writes applied as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationBundle {
    pub guard: Option<GuardClause>,
    pub mutations: Vec<CacheMutation>,
}

impl MutationBundle {
    pub fn guarded(guard: GuardClause, mutations: Vec<CacheMutation>) -> Self {
        Self {
            guard: Some(guard),
            mutations,
        }
    }

    pub fn unguarded(mutations: Vec<CacheMutation>) -> Self {
        Self {
            guard: None,
            mutations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_none() && self.mutations.is_empty()
    }
}

/// Result of executing a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleResult {
    Applied,
    /// The guard rejected the bundle; nothing was written.
    Stale { last_applied_ts: i64 },
}
