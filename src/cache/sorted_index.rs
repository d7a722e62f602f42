//! Sorted id indexes for recency lists, comment lists, and rankings.
//!
//! Members are ordered by score descending, ties by member id descending.
//! Writes are expressed as [`CacheMutation`]s so they join the bundle of the
//! event that caused them; reads go straight to the store.

use super::client::CacheClient;
use super::error::CacheError;
use super::keys::IndexKey;
use super::mutation::CacheMutation;

/// One offset page of an index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPage {
    pub ids: Vec<i64>,
    /// Members currently held by the index.
    pub total: u64,
}

/// Members following a cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSlice {
    pub ids: Vec<i64>,
    /// Whether the cursor member was present in the index.
    pub cursor_found: bool,
}

#[derive(Clone)]
pub struct SortedIndex {
    client: CacheClient,
}

impl SortedIndex {
    pub fn new(client: CacheClient) -> Self {
        Self { client }
    }

    pub fn add(index: IndexKey, id: i64, score: f64) -> CacheMutation {
        CacheMutation::IndexAdd {
            index: index.to_key(),
            member: id,
            score,
        }
    }

    pub fn remove(index: IndexKey, id: i64) -> CacheMutation {
        CacheMutation::IndexRemove {
            index: index.to_key(),
            member: id,
        }
    }

    /// Evict the lowest `(score, member)` entries beyond `max_size`.
    pub fn trim_to_size(index: IndexKey, max_size: usize) -> CacheMutation {
        CacheMutation::IndexTrim {
            index: index.to_key(),
            max_size,
        }
    }

    /// Drop the index entirely.
    pub fn delete(index: IndexKey) -> CacheMutation {
        CacheMutation::DeleteKey {
            key: index.to_key(),
        }
    }

    /// Swap the whole index for `entries`.
    pub fn replace_all(index: IndexKey, entries: Vec<(i64, f64)>) -> CacheMutation {
        CacheMutation::IndexReplace {
            index: index.to_key(),
            entries,
        }
    }

    /// Page `page` (1-based; `0` reads as `1`) of `size` members.
    pub async fn read_by_offset(
        &self,
        index: IndexKey,
        page: u32,
        size: u32,
    ) -> Result<IndexPage, CacheError> {
        let key = index.to_key();
        let start = page.max(1).saturating_sub(1) as usize * size as usize;
        let ids = self.client.index_range(&key, start, size as usize).await?;
        let total = self.client.index_len(&key).await?;
        Ok(IndexPage { ids, total })
    }

    /// Up to `limit` members after `last_seen`, or from the head when `None`.
    pub async fn read_by_cursor(
        &self,
        index: IndexKey,
        last_seen: Option<i64>,
        limit: u32,
    ) -> Result<IndexSlice, CacheError> {
        let key = index.to_key();
        match last_seen {
            None => Ok(IndexSlice {
                ids: self.client.index_range(&key, 0, limit as usize).await?,
                cursor_found: true,
            }),
            Some(member) => {
                let found = self
                    .client
                    .index_after(&key, member, limit as usize)
                    .await?;
                Ok(IndexSlice {
                    cursor_found: found.is_some(),
                    ids: found.unwrap_or_default(),
                })
            }
        }
    }

    pub async fn len(&self, index: IndexKey) -> Result<u64, CacheError> {
        self.client.index_len(&index.to_key()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::cache::memory::InMemoryStore;
    use crate::cache::mutation::MutationBundle;
    use crate::cache::store::ExecutionStrategy;

    async fn seeded(mutations: Vec<CacheMutation>) -> (CacheClient, SortedIndex) {
        let client = CacheClient::new(Arc::new(InMemoryStore::new()), Duration::from_secs(1));
        client
            .execute(
                &MutationBundle::unguarded(mutations),
                ExecutionStrategy::Script,
            )
            .await
            .expect("seed");
        (client.clone(), SortedIndex::new(client))
    }

    #[tokio::test]
    async fn trim_keeps_highest_scores() {
        let index = IndexKey::BoardComments(1);
        let mut mutations: Vec<_> = (1..=5)
            .map(|id| SortedIndex::add(index, id, id as f64))
            .collect();
        mutations.push(SortedIndex::trim_to_size(index, 3));
        let (_client, sorted) = seeded(mutations).await;

        let page = sorted.read_by_offset(index, 1, 10).await.expect("read");
        assert_eq!(page.ids, vec![5, 4, 3]);
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn offset_pages_are_one_based() {
        let index = IndexKey::RecentBoards;
        let mutations = (1..=5)
            .map(|id| SortedIndex::add(index, id, id as f64))
            .collect();
        let (_client, sorted) = seeded(mutations).await;

        let first = sorted.read_by_offset(index, 0, 2).await.expect("read");
        assert_eq!(first.ids, vec![5, 4]);
        let third = sorted.read_by_offset(index, 3, 2).await.expect("read");
        assert_eq!(third.ids, vec![1]);
        assert_eq!(third.total, 5);
    }

    #[tokio::test]
    async fn cursor_reports_unknown_member() {
        let index = IndexKey::CategoryBoards(7);
        let mutations = (1..=3)
            .map(|id| SortedIndex::add(index, id, 100.0))
            .collect();
        let (_client, sorted) = seeded(mutations).await;

        let slice = sorted.read_by_cursor(index, Some(3), 5).await.expect("read");
        assert_eq!(slice.ids, vec![2, 1]);
        assert!(slice.cursor_found);

        let unknown = sorted.read_by_cursor(index, Some(42), 5).await.expect("read");
        assert!(!unknown.cursor_found);
        assert!(unknown.ids.is_empty());
    }
}
