//! In-process key-value store backend.
//!
//! Models the semantics of a remote store: one keyspace with typed values,
//! lazy expiry, and bundles evaluated atomically under a single lock. Also
//! exposes fault and latency injection so outage and deadline behaviour can
//! be exercised without a network.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::trace;

use super::error::StoreError;
use super::lock::mutex_lock;
use super::mutation::{BundleResult, CacheMutation, MutationBundle};
use super::store::{ExecutionStrategy, KeyValueStore};

const SOURCE: &str = "cache::memory";
const WRONG_TYPE: &str = "WRONGTYPE operation against a key holding the wrong kind of value";

/// Score with a total order so it can key a `BTreeSet`.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == CmpOrdering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.total_cmp(&other.0)
    }
}

/// Sorted set ordered ascending by `(score, member)`.
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<i64, Score>,
    order: BTreeSet<(Score, i64)>,
}

impl SortedSet {
    fn insert(&mut self, member: i64, score: f64) {
        let score = Score(score);
        if let Some(previous) = self.scores.insert(member, score) {
            self.order.remove(&(previous, member));
        }
        self.order.insert((score, member));
    }

    fn remove(&mut self, member: i64) {
        if let Some(score) = self.scores.remove(&member) {
            self.order.remove(&(score, member));
        }
    }

    fn trim(&mut self, max_size: usize) {
        while self.order.len() > max_size {
            if let Some((_, member)) = self.order.pop_first() {
                self.scores.remove(&member);
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn descending(&self) -> impl Iterator<Item = i64> + '_ {
        self.order.iter().rev().map(|(_, member)| *member)
    }

    fn after(&self, member: i64) -> Option<impl Iterator<Item = i64> + '_> {
        let score = *self.scores.get(&member)?;
        Some(
            self.order
                .range(..(score, member))
                .rev()
                .map(|(_, member)| *member),
        )
    }
}

#[derive(Debug)]
enum Value {
    Bytes(Vec<u8>),
    Integer(i64),
    Index(SortedSet),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|deadline| deadline <= now);
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn bytes(&mut self, key: &str, now: Instant) -> Result<Option<Vec<u8>>, StoreError> {
        match self.live(key, now).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(_) => Err(StoreError::command(WRONG_TYPE)),
        }
    }

    fn integer(&mut self, key: &str, now: Instant) -> Result<Option<i64>, StoreError> {
        match self.live(key, now).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Integer(value)) => Ok(Some(*value)),
            Some(_) => Err(StoreError::command(WRONG_TYPE)),
        }
    }

    fn index(&mut self, key: &str, now: Instant) -> Result<Option<&SortedSet>, StoreError> {
        match self.live(key, now).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Index(set)) => Ok(Some(set)),
            Some(_) => Err(StoreError::command(WRONG_TYPE)),
        }
    }

    fn index_mut(&mut self, key: &str, now: Instant) -> &mut SortedSet {
        if self.live(key, now).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Index(SortedSet::default()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|entry| &mut entry.value) {
            Some(Value::Index(set)) => set,
            // Types are validated before any write in a bundle.
            _ => unreachable!("index type validated before write"),
        }
    }

    fn drop_if_empty_index(&mut self, key: &str) {
        let empty = matches!(
            self.entries.get(key).map(|entry| &entry.value),
            Some(Value::Index(set)) if set.order.is_empty()
        );
        if empty {
            self.entries.remove(key);
        }
    }

    /// Reject the bundle before any write if a target holds the wrong type.
    fn validate(&mut self, bundle: &MutationBundle, now: Instant) -> Result<(), StoreError> {
        if let Some(guard) = &bundle.guard {
            self.integer(&guard.marker_key, now)?;
        }
        for mutation in &bundle.mutations {
            match mutation {
                CacheMutation::IndexAdd { index, .. }
                | CacheMutation::IndexRemove { index, .. }
                | CacheMutation::IndexTrim { index, .. } => {
                    self.index(index, now)?;
                }
                CacheMutation::CounterDelta { key, .. } => {
                    self.integer(key, now)?;
                }
                CacheMutation::CounterSubtract { key, by_key } => {
                    self.integer(key, now)?;
                    self.integer(by_key, now)?;
                }
                CacheMutation::DeleteIndexedKeys { index, .. } => {
                    self.index(index, now)?;
                }
                CacheMutation::PutDetail { .. }
                | CacheMutation::DeleteKey { .. }
                | CacheMutation::IndexReplace { .. } => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, bundle: &MutationBundle, now: Instant) -> Result<BundleResult, StoreError> {
        self.validate(bundle, now)?;

        if let Some(guard) = &bundle.guard {
            let current = self.integer(&guard.marker_key, now)?;
            if !guard.admits(current) {
                return Ok(BundleResult::Stale {
                    last_applied_ts: current.unwrap_or(0),
                });
            }
        }

        for mutation in &bundle.mutations {
            self.apply_one(mutation, now);
        }

        if let Some(guard) = &bundle.guard {
            self.entries.insert(
                guard.marker_key.clone(),
                Entry {
                    value: Value::Integer(guard.incoming_ts),
                    expires_at: Some(now + guard.ttl),
                },
            );
        }

        Ok(BundleResult::Applied)
    }

    fn apply_one(&mut self, mutation: &CacheMutation, now: Instant) {
        match mutation {
            CacheMutation::PutDetail {
                key,
                bytes,
                ttl,
                only_if_absent,
            } => {
                if *only_if_absent && self.live(key, now).is_some() {
                    return;
                }
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Bytes(bytes.clone()),
                        expires_at: ttl.map(|ttl| now + ttl),
                    },
                );
            }
            CacheMutation::DeleteKey { key } => {
                self.entries.remove(key);
            }
            CacheMutation::IndexAdd {
                index,
                member,
                score,
            } => {
                self.index_mut(index, now).insert(*member, *score);
            }
            CacheMutation::IndexRemove { index, member } => {
                if self.live(index, now).is_some() {
                    self.index_mut(index, now).remove(*member);
                    self.drop_if_empty_index(index);
                }
            }
            CacheMutation::IndexTrim { index, max_size } => {
                if self.live(index, now).is_some() {
                    self.index_mut(index, now).trim(*max_size);
                    self.drop_if_empty_index(index);
                }
            }
            CacheMutation::IndexReplace { index, entries } => {
                self.entries.remove(index);
                if entries.is_empty() {
                    return;
                }
                let set = self.index_mut(index, now);
                for (member, score) in entries {
                    set.insert(*member, *score);
                }
            }
            CacheMutation::CounterDelta { key, delta } => {
                self.add_to_counter(key, *delta, now);
            }
            CacheMutation::CounterSubtract { key, by_key } => {
                let by = match self.live(by_key, now).map(|entry| &entry.value) {
                    Some(Value::Integer(value)) => *value,
                    _ => 0,
                };
                if by != 0 {
                    self.add_to_counter(key, by.saturating_neg(), now);
                }
            }
            CacheMutation::DeleteIndexedKeys { index, key_prefix } => {
                let members: Vec<i64> = match self.live(index, now).map(|entry| &entry.value) {
                    Some(Value::Index(set)) => set.descending().collect(),
                    _ => Vec::new(),
                };
                for member in members {
                    self.entries.remove(&format!("{key_prefix}{member}"));
                }
            }
        }
    }

    fn add_to_counter(&mut self, key: &str, delta: i64, now: Instant) {
        let current = match self.live(key, now).map(|entry| &entry.value) {
            Some(Value::Integer(value)) => *value,
            _ => 0,
        };
        let next = current.saturating_add(delta).max(0);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Integer(next),
                expires_at: None,
            },
        );
    }
}

/// Round trips served by an [`InMemoryStore`], by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    pub scripts: u64,
    pub pipelines: u64,
}

/// In-process store shared across tasks.
pub struct InMemoryStore {
    keyspace: Mutex<Keyspace>,
    available: AtomicBool,
    latency_ms: AtomicU64,
    reads: AtomicU64,
    scripts: AtomicU64,
    pipelines: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            keyspace: Mutex::new(Keyspace::default()),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            scripts: AtomicU64::new(0),
            pipelines: AtomicU64::new(0),
        }
    }

    /// Simulate the store becoming unreachable (or reachable again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every subsequent call by `latency` before it touches state.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Write a raw byte value outside of any bundle (fixtures, corruption tests).
    pub fn put_raw(&self, key: &str, bytes: Vec<u8>) {
        self.lock("put_raw").entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(bytes),
                expires_at: None,
            },
        );
    }

    /// Whether a live value exists under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock("contains_key")
            .live(key, Instant::now())
            .is_some()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            scripts: self.scripts.load(Ordering::Relaxed),
            pipelines: self.pipelines.load(Ordering::Relaxed),
        }
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, Keyspace> {
        mutex_lock(&self.keyspace, SOURCE, op)
    }

    async fn round_trip(&self, op: &'static str) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(format!(
                "connection refused during `{op}`"
            )));
        }
        Ok(())
    }

    async fn execute(
        &self,
        bundle: &MutationBundle,
        strategy: ExecutionStrategy,
    ) -> Result<BundleResult, StoreError> {
        self.round_trip(strategy.as_str()).await?;
        match strategy {
            ExecutionStrategy::Script => self.scripts.fetch_add(1, Ordering::Relaxed),
            ExecutionStrategy::Pipeline => self.pipelines.fetch_add(1, Ordering::Relaxed),
        };
        let result = self.lock(strategy.as_str()).apply(bundle, Instant::now())?;
        trace!(
            strategy = strategy.as_str(),
            mutations = bundle.mutations.len(),
            result = ?result,
            "Bundle evaluated"
        );
        Ok(result)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.round_trip("get").await?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.lock("get").bytes(key, Instant::now())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.round_trip("get_many").await?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut keyspace = self.lock("get_many");
        keys.iter().map(|key| keyspace.bytes(key, now)).collect()
    }

    async fn get_integers(&self, keys: &[String]) -> Result<Vec<Option<i64>>, StoreError> {
        self.round_trip("get_integers").await?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut keyspace = self.lock("get_integers");
        keys.iter().map(|key| keyspace.integer(key, now)).collect()
    }

    async fn index_range(
        &self,
        index: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<i64>, StoreError> {
        self.round_trip("index_range").await?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let mut keyspace = self.lock("index_range");
        Ok(keyspace
            .index(index, Instant::now())?
            .map(|set| set.descending().skip(start).take(count).collect())
            .unwrap_or_default())
    }

    async fn index_after(
        &self,
        index: &str,
        member: i64,
        count: usize,
    ) -> Result<Option<Vec<i64>>, StoreError> {
        self.round_trip("index_after").await?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let mut keyspace = self.lock("index_after");
        Ok(keyspace
            .index(index, Instant::now())?
            .and_then(|set| set.after(member))
            .map(|members| members.take(count).collect()))
    }

    async fn index_len(&self, index: &str) -> Result<u64, StoreError> {
        self.round_trip("index_len").await?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let mut keyspace = self.lock("index_len");
        Ok(keyspace
            .index(index, Instant::now())?
            .map(|set| set.len() as u64)
            .unwrap_or(0))
    }

    async fn execute_script(&self, bundle: &MutationBundle) -> Result<BundleResult, StoreError> {
        self.execute(bundle, ExecutionStrategy::Script).await
    }

    async fn execute_pipeline(
        &self,
        bundle: &MutationBundle,
    ) -> Result<BundleResult, StoreError> {
        self.execute(bundle, ExecutionStrategy::Pipeline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::mutation::GuardClause;

    fn guard(ts: i64) -> GuardClause {
        GuardClause {
            marker_key: "marker:board:1".to_string(),
            incoming_ts: ts,
            ttl: Duration::from_secs(60),
        }
    }

    fn add(index: &str, member: i64, score: f64) -> CacheMutation {
        CacheMutation::IndexAdd {
            index: index.to_string(),
            member,
            score,
        }
    }

    #[tokio::test]
    async fn index_orders_by_score_descending_with_member_tiebreak() {
        let store = InMemoryStore::new();
        let bundle = MutationBundle::unguarded(vec![
            add("idx", 1, 10.0),
            add("idx", 2, 30.0),
            add("idx", 3, 20.0),
            add("idx", 4, 20.0),
        ]);
        store.execute_script(&bundle).await.expect("apply");

        let all = store.index_range("idx", 0, 10).await.expect("range");
        assert_eq!(all, vec![2, 4, 3, 1]);

        let after = store.index_after("idx", 4, 10).await.expect("after");
        assert_eq!(after, Some(vec![3, 1]));

        let missing = store.index_after("idx", 99, 10).await.expect("after");
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn stale_guard_writes_nothing() {
        let store = InMemoryStore::new();
        let first = MutationBundle::guarded(guard(100), vec![add("idx", 1, 1.0)]);
        assert_eq!(
            store.execute_script(&first).await.expect("apply"),
            BundleResult::Applied
        );

        let stale = MutationBundle::guarded(guard(100), vec![add("idx", 2, 2.0)]);
        assert_eq!(
            store.execute_script(&stale).await.expect("apply"),
            BundleResult::Stale {
                last_applied_ts: 100
            }
        );
        assert_eq!(store.index_len("idx").await.expect("len"), 1);
    }

    #[tokio::test]
    async fn wrong_type_rejects_whole_bundle() {
        let store = InMemoryStore::new();
        store.put_raw("counter:x", b"not a number".to_vec());

        let bundle = MutationBundle::guarded(
            guard(10),
            vec![
                add("idx", 1, 1.0),
                CacheMutation::CounterDelta {
                    key: "counter:x".to_string(),
                    delta: 1,
                },
            ],
        );
        let err = store.execute_script(&bundle).await.expect_err("wrong type");
        assert!(matches!(err, StoreError::Command(_)));
        assert_eq!(store.index_len("idx").await.expect("len"), 0);
        assert!(!store.contains_key("marker:board:1"));
    }

    #[tokio::test]
    async fn counters_clamp_at_zero() {
        let store = InMemoryStore::new();
        let decrement = MutationBundle::unguarded(vec![CacheMutation::CounterDelta {
            key: "c".to_string(),
            delta: -1,
        }]);
        store.execute_script(&decrement).await.expect("apply");
        store.execute_script(&decrement).await.expect("apply");

        let values = store
            .get_integers(&["c".to_string()])
            .await
            .expect("read counter");
        assert_eq!(values, vec![Some(0)]);
    }

    #[tokio::test]
    async fn put_if_absent_keeps_existing_value() {
        let store = InMemoryStore::new();
        store.put_raw("detail:board:1", b"fresh".to_vec());

        let bundle = MutationBundle::unguarded(vec![CacheMutation::PutDetail {
            key: "detail:board:1".to_string(),
            bytes: b"warm".to_vec(),
            ttl: None,
            only_if_absent: true,
        }]);
        store.execute_pipeline(&bundle).await.expect("apply");

        let value = store.get("detail:board:1").await.expect("get");
        assert_eq!(value.as_deref(), Some(b"fresh".as_slice()));
        assert_eq!(store.stats().pipelines, 1);
    }

    #[tokio::test]
    async fn replace_swaps_entire_index() {
        let store = InMemoryStore::new();
        let seed = MutationBundle::unguarded(vec![add("rank", 1, 5.0), add("rank", 2, 9.0)]);
        store.execute_script(&seed).await.expect("seed");

        let swap = MutationBundle::unguarded(vec![CacheMutation::IndexReplace {
            index: "rank".to_string(),
            entries: vec![(3, 1.0), (4, 2.0)],
        }]);
        store.execute_script(&swap).await.expect("swap");

        assert_eq!(
            store.index_range("rank", 0, 10).await.expect("range"),
            vec![4, 3]
        );
    }

    #[tokio::test]
    async fn counter_subtract_and_indexed_key_cleanup() {
        let store = InMemoryStore::new();
        store.put_raw("detail:comment:1", b"a".to_vec());
        store.put_raw("detail:comment:2", b"b".to_vec());
        store.put_raw("detail:comment:3", b"c".to_vec());
        let seed = MutationBundle::unguarded(vec![
            add("comments", 1, 1.0),
            add("comments", 2, 2.0),
            CacheMutation::CounterDelta {
                key: "total".to_string(),
                delta: 5,
            },
            CacheMutation::CounterDelta {
                key: "per_board".to_string(),
                delta: 7,
            },
        ]);
        store.execute_script(&seed).await.expect("seed");

        let cleanup = MutationBundle::unguarded(vec![
            CacheMutation::DeleteIndexedKeys {
                index: "comments".to_string(),
                key_prefix: "detail:comment:".to_string(),
            },
            CacheMutation::CounterSubtract {
                key: "total".to_string(),
                by_key: "per_board".to_string(),
            },
        ]);
        store.execute_script(&cleanup).await.expect("cleanup");

        assert!(!store.contains_key("detail:comment:1"));
        assert!(!store.contains_key("detail:comment:2"));
        assert!(store.contains_key("detail:comment:3"));
        let values = store
            .get_integers(&["total".to_string(), "per_board".to_string()])
            .await
            .expect("counters");
        assert_eq!(values, vec![Some(0), Some(7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn markers_expire_after_ttl() {
        let store = InMemoryStore::new();
        let bundle = MutationBundle::guarded(guard(100), Vec::new());
        store.execute_script(&bundle).await.expect("apply");
        assert!(store.contains_key("marker:board:1"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!store.contains_key("marker:board:1"));

        // An expired marker no longer rejects an older event.
        let older = MutationBundle::guarded(guard(50), Vec::new());
        assert_eq!(
            store.execute_script(&older).await.expect("apply"),
            BundleResult::Applied
        );
    }

    #[tokio::test]
    async fn unavailable_store_fails_calls() {
        let store = InMemoryStore::new();
        store.set_available(false);
        let err = store.get("anything").await.expect_err("unavailable");
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
