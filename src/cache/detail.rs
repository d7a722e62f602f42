//! Serialized detail snapshots keyed by entity id.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;

use metrics::counter;
use tracing::warn;

use crate::domain::entities::ReadModel;

use super::client::CacheClient;
use super::error::CacheError;
use super::keys::{IndexKey, detail_key, detail_key_prefix};
use super::mutation::{CacheMutation, MutationBundle};
use super::store::ExecutionStrategy;

const METRIC_DETAIL_HIT: &str = "corkboard_detail_hit_total";
const METRIC_DETAIL_MISS: &str = "corkboard_detail_miss_total";
const METRIC_DETAIL_CORRUPT: &str = "corkboard_detail_corrupt_total";

/// Detail cache for one read model type.
///
/// A blob that fails to decode is logged, counted, and reported as a miss so
/// the caller falls back to the system of record.
pub struct DetailCache<M> {
    client: CacheClient,
    ttl: Option<Duration>,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for DetailCache<M> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            ttl: self.ttl,
            _model: PhantomData,
        }
    }
}

impl<M: ReadModel> DetailCache<M> {
    pub fn new(client: CacheClient, ttl: Option<Duration>) -> Self {
        Self {
            client,
            ttl,
            _model: PhantomData,
        }
    }

    pub async fn get(&self, id: i64) -> Result<Option<M>, CacheError> {
        let bytes = self.client.get(&detail_key(M::ENTITY, id)).await?;
        let model = bytes.and_then(|bytes| decode::<M>(id, &bytes));
        record_lookups(model.is_some() as u64, model.is_none() as u64);
        Ok(model)
    }

    /// Cached snapshots for `ids`, keyed by id. Missing ids are omitted.
    pub async fn get_many(&self, ids: &[i64]) -> Result<HashMap<i64, M>, CacheError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| detail_key(M::ENTITY, *id)).collect();
        let values = self.client.get_many(&keys).await?;

        let found: HashMap<i64, M> = ids
            .iter()
            .zip(values)
            .filter_map(|(id, bytes)| {
                let model = decode::<M>(*id, &bytes?)?;
                Some((*id, model))
            })
            .collect();
        let hits = found.len() as u64;
        record_lookups(hits, ids.len() as u64 - hits);
        Ok(found)
    }

    pub async fn put(&self, model: &M) -> Result<(), CacheError> {
        self.put_many(std::slice::from_ref(model)).await
    }

    /// Overwrite snapshots for every model in one bundle.
    pub async fn put_many(&self, models: &[M]) -> Result<(), CacheError> {
        let mutations = models
            .iter()
            .map(|model| self.put_mutation(model))
            .collect::<Result<Vec<_>, _>>()?;
        self.write(mutations).await
    }

    /// Store snapshots only where none is cached yet.
    ///
    /// Used when warming from the system of record, so a fetched snapshot
    /// never replaces one written by a newer event.
    pub async fn populate_many(&self, models: &[M]) -> Result<(), CacheError> {
        let mutations = models
            .iter()
            .map(|model| self.populate_mutation(model))
            .collect::<Result<Vec<_>, _>>()?;
        self.write(mutations).await
    }

    pub async fn delete(&self, id: i64) -> Result<(), CacheError> {
        self.write(vec![self.delete_mutation(id)]).await
    }

    pub fn put_mutation(&self, model: &M) -> Result<CacheMutation, CacheError> {
        self.encode(model, false)
    }

    pub fn populate_mutation(&self, model: &M) -> Result<CacheMutation, CacheError> {
        self.encode(model, true)
    }

    pub fn delete_mutation(&self, id: i64) -> CacheMutation {
        CacheMutation::DeleteKey {
            key: detail_key(M::ENTITY, id),
        }
    }

    /// Drop the snapshot of every member of `index`.
    pub fn delete_members_mutation(&self, index: IndexKey) -> CacheMutation {
        CacheMutation::DeleteIndexedKeys {
            index: index.to_key(),
            key_prefix: detail_key_prefix(M::ENTITY),
        }
    }

    fn encode(&self, model: &M, only_if_absent: bool) -> Result<CacheMutation, CacheError> {
        let bytes = serde_json::to_vec(model).map_err(|source| CacheError::Serialization {
            entity: M::ENTITY,
            source,
        })?;
        Ok(CacheMutation::PutDetail {
            key: detail_key(M::ENTITY, model.id()),
            bytes,
            ttl: self.ttl,
            only_if_absent,
        })
    }

    async fn write(&self, mutations: Vec<CacheMutation>) -> Result<(), CacheError> {
        if mutations.is_empty() {
            return Ok(());
        }
        let bundle = MutationBundle::unguarded(mutations);
        self.client
            .execute(&bundle, ExecutionStrategy::Script)
            .await?;
        Ok(())
    }
}

fn decode<M: ReadModel>(id: i64, bytes: &[u8]) -> Option<M> {
    match serde_json::from_slice(bytes) {
        Ok(model) => Some(model),
        Err(err) => {
            warn!(
                entity = %M::ENTITY,
                id,
                error = %err,
                "Discarding undecodable cached snapshot"
            );
            counter!(METRIC_DETAIL_CORRUPT, "entity" => M::ENTITY.as_str()).increment(1);
            None
        }
    }
}

fn record_lookups(hits: u64, misses: u64) {
    if hits > 0 {
        counter!(METRIC_DETAIL_HIT).increment(hits);
    }
    if misses > 0 {
        counter!(METRIC_DETAIL_MISS).increment(misses);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;

    use super::*;
    use crate::cache::memory::InMemoryStore;
    use crate::domain::entities::CommentReadModel;

    fn comment(id: i64, content: &str) -> CommentReadModel {
        CommentReadModel {
            comment_id: id,
            board_id: 1,
            parent_comment_id: None,
            content: content.to_string(),
            writer_id: 1,
            created_at: datetime!(2024-01-01 00:00 UTC),
            event_ts: 0,
        }
    }

    fn fixture() -> (Arc<InMemoryStore>, DetailCache<CommentReadModel>) {
        let store = Arc::new(InMemoryStore::new());
        let client = CacheClient::new(store.clone(), Duration::from_secs(1));
        (store, DetailCache::new(client, None))
    }

    #[tokio::test]
    async fn get_many_returns_found_entries_only() {
        let (_store, cache) = fixture();
        cache
            .put_many(&[comment(1, "a"), comment(3, "c")])
            .await
            .expect("put");

        let found = cache.get_many(&[1, 2, 3]).await.expect("read");
        assert_eq!(found.len(), 2);
        assert_eq!(found[&3].content, "c");
        assert!(!found.contains_key(&2));
    }

    #[tokio::test]
    async fn corrupt_blob_reads_as_miss() {
        let (store, cache) = fixture();
        store.put_raw("detail:comment:5", b"{not json".to_vec());

        assert_eq!(cache.get(5).await.expect("read"), None);
    }

    #[tokio::test]
    async fn populate_does_not_overwrite_event_snapshot() {
        let (_store, cache) = fixture();
        cache.put(&comment(1, "from event")).await.expect("put");

        cache
            .populate_many(&[comment(1, "from source"), comment(2, "fresh")])
            .await
            .expect("populate");

        let found = cache.get_many(&[1, 2]).await.expect("read");
        assert_eq!(found[&1].content, "from event");
        assert_eq!(found[&2].content, "fresh");
    }

    #[tokio::test]
    async fn delete_removes_snapshot() {
        let (_store, cache) = fixture();
        cache.put(&comment(9, "x")).await.expect("put");
        cache.delete(9).await.expect("delete");
        assert_eq!(cache.get(9).await.expect("read"), None);
    }
}
