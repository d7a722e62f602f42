//! Corkboard read-side cache.
//!
//! Derived structures kept in a key-value store:
//!
//! - **Detail snapshots**: one serialized read model per board or comment
//! - **Sorted indexes**: recency, per-category, per-board comment, ranking
//! - **Counters**: board and comment totals
//! - **Idempotency markers**: last applied event timestamp per subject
//!
//! All writes travel through [`MutationExecutor`] as atomic bundles.
//!
//! ## Backends
//!
//! - [`RedisStore`]: shared by every instance; used whenever `store.url` is set
//! - [`InMemoryStore`]: local to one process; tests and single-node replays
//!
//! ## Configuration
//!
//! ```toml
//! [store]
//! url = "redis://127.0.0.1:6379/0"
//!
//! [cache]
//! marker_ttl_secs = 86400
//! detail_ttl_secs = 86400
//! comment_list_limit = 100
//! # ... see config.rs for all options
//! ```

mod client;
mod config;
mod counter;
mod detail;
mod error;
mod executor;
mod guard;
mod keys;
mod lock;
mod memory;
mod mutation;
mod remote;
mod sorted_index;
mod store;

pub(crate) use lock::mutex_lock;

pub use client::CacheClient;
pub use config::CacheConfig;
pub use counter::Counters;
pub use detail::DetailCache;
pub use error::{CacheError, StoreError};
pub use executor::{ApplyOutcome, MutationExecutor};
pub use guard::IdempotencyGuard;
pub use keys::{CounterKey, GuardKey, IndexKey, detail_key};
pub use memory::{InMemoryStore, StoreStats};
pub use mutation::{BundleResult, CacheMutation, GuardClause, MutationBundle};
pub use remote::RedisStore;
pub use sorted_index::{IndexPage, IndexSlice, SortedIndex};
pub use store::{ExecutionStrategy, KeyValueStore};
