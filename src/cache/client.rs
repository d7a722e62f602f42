//! Timeout-bounded access to the key-value store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::error::{CacheError, StoreError};
use super::mutation::{BundleResult, MutationBundle};
use super::store::{ExecutionStrategy, KeyValueStore};

/// Shared handle to the store with a per-call timeout.
///
/// Every cache component goes through this handle so a stalled store turns
/// into [`CacheError::Timeout`] instead of an unbounded wait.
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn KeyValueStore>,
    op_timeout: Duration,
}

impl CacheClient {
    pub fn new(store: Arc<dyn KeyValueStore>, op_timeout: Duration) -> Self {
        Self { store, op_timeout }
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    async fn bounded<T, F>(&self, op: &'static str, call: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.op_timeout, call).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => {
                let timeout_ms = self.op_timeout.as_millis() as u64;
                warn!(op, timeout_ms, "Store call timed out");
                Err(CacheError::Timeout { op, timeout_ms })
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.bounded("get", self.store.get(key)).await
    }

    pub async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.bounded("get_many", self.store.get_many(keys)).await
    }

    pub async fn get_integers(&self, keys: &[String]) -> Result<Vec<Option<i64>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.bounded("get_integers", self.store.get_integers(keys))
            .await
    }

    pub async fn index_range(
        &self,
        index: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<i64>, CacheError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.bounded("index_range", self.store.index_range(index, start, count))
            .await
    }

    pub async fn index_after(
        &self,
        index: &str,
        member: i64,
        count: usize,
    ) -> Result<Option<Vec<i64>>, CacheError> {
        self.bounded("index_after", self.store.index_after(index, member, count))
            .await
    }

    pub async fn index_len(&self, index: &str) -> Result<u64, CacheError> {
        self.bounded("index_len", self.store.index_len(index)).await
    }

    pub async fn execute(
        &self,
        bundle: &MutationBundle,
        strategy: ExecutionStrategy,
    ) -> Result<BundleResult, CacheError> {
        match strategy {
            ExecutionStrategy::Script => {
                self.bounded("execute_script", self.store.execute_script(bundle))
                    .await
            }
            ExecutionStrategy::Pipeline => {
                self.bounded("execute_pipeline", self.store.execute_pipeline(bundle))
                    .await
            }
        }
    }
}
