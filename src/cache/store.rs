//! Key-value store contract.
//!
//! The cache relies only on primitives a remote key-value store offers:
//! byte values and integers with expiry, sorted sets with rank and cursor
//! reads, server-evaluated atomic scripts, and pipelined batches.

use async_trait::async_trait;

use super::error::StoreError;
use super::mutation::{BundleResult, MutationBundle};

/// How a bundle reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Evaluated server-side as one atomic script.
    Script,
    /// Sent as one pipelined batch after a client-side read.
    Pipeline,
}

impl ExecutionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStrategy::Script => "script",
            ExecutionStrategy::Pipeline => "pipeline",
        }
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a byte value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Read several byte values in one round trip, positionally.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;

    /// Read integer values (markers, counters) in one round trip, positionally.
    async fn get_integers(&self, keys: &[String]) -> Result<Vec<Option<i64>>, StoreError>;

    /// Members ranked `start..start + count`, highest score first.
    async fn index_range(
        &self,
        index: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<i64>, StoreError>;

    /// Up to `count` members ranked strictly after `member`, highest score first.
    ///
    /// Returns `None` when `member` is not in the index.
    async fn index_after(
        &self,
        index: &str,
        member: i64,
        count: usize,
    ) -> Result<Option<Vec<i64>>, StoreError>;

    /// Number of members in the index; zero when absent.
    async fn index_len(&self, index: &str) -> Result<u64, StoreError>;

    /// Apply a bundle as one server-side atomic script.
    async fn execute_script(&self, bundle: &MutationBundle) -> Result<BundleResult, StoreError>;

    /// Apply a bundle as one pipelined batch.
    ///
    /// The guard clause, when present, is evaluated ahead of the writes in
    /// the same batch, so a stale batch writes nothing.
    async fn execute_pipeline(&self, bundle: &MutationBundle)
    -> Result<BundleResult, StoreError>;
}
