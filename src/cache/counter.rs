//! Non-negative counters.

use super::client::CacheClient;
use super::error::CacheError;
use super::keys::CounterKey;
use super::mutation::CacheMutation;

#[derive(Clone)]
pub struct Counters {
    client: CacheClient,
}

impl Counters {
    pub fn new(client: CacheClient) -> Self {
        Self { client }
    }

    /// Current value; an absent counter reads as zero.
    pub async fn get(&self, key: CounterKey) -> Result<i64, CacheError> {
        Ok(self.get_many(&[key]).await?.into_iter().next().unwrap_or(0))
    }

    /// Values for `keys`, positionally; absent counters read as zero.
    pub async fn get_many(&self, keys: &[CounterKey]) -> Result<Vec<i64>, CacheError> {
        let values = self.peek_many(keys).await?;
        Ok(values.into_iter().map(|value| value.unwrap_or(0)).collect())
    }

    /// Like [`Counters::get`], but `None` when the counter does not exist.
    pub async fn peek(&self, key: CounterKey) -> Result<Option<i64>, CacheError> {
        Ok(self.peek_many(&[key]).await?.into_iter().next().flatten())
    }

    pub async fn peek_many(&self, keys: &[CounterKey]) -> Result<Vec<Option<i64>>, CacheError> {
        let keys: Vec<String> = keys.iter().map(CounterKey::to_key).collect();
        self.client.get_integers(&keys).await
    }

    pub fn increment(key: CounterKey) -> CacheMutation {
        CacheMutation::CounterDelta {
            key: key.to_key(),
            delta: 1,
        }
    }

    /// Decrement by one; the store clamps the result at zero.
    pub fn decrement(key: CounterKey) -> CacheMutation {
        CacheMutation::CounterDelta {
            key: key.to_key(),
            delta: -1,
        }
    }

    /// Subtract the current value of `by` from `key`; clamped at zero.
    pub fn subtract(key: CounterKey, by: CounterKey) -> CacheMutation {
        CacheMutation::CounterSubtract {
            key: key.to_key(),
            by_key: by.to_key(),
        }
    }

    pub fn delete(key: CounterKey) -> CacheMutation {
        CacheMutation::DeleteKey { key: key.to_key() }
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

    #[tokio::test]
    async fn absent_counters_read_as_zero_and_never_go_negative() {
        let client = CacheClient::new(Arc::new(InMemoryStore::new()), Duration::from_secs(1));
        let counters = Counters::new(client.clone());
        assert_eq!(counters.get(CounterKey::TotalBoards).await.expect("read"), 0);
        assert_eq!(counters.peek(CounterKey::TotalBoards).await.expect("read"), None);

        let bundle = MutationBundle::unguarded(vec![
            Counters::increment(CounterKey::TotalComments),
            Counters::decrement(CounterKey::TotalComments),
            Counters::decrement(CounterKey::TotalComments),
            Counters::increment(CounterKey::BoardComments(4)),
        ]);
        client
            .execute(&bundle, ExecutionStrategy::Script)
            .await
            .expect("apply");

        let values = counters
            .get_many(&[CounterKey::TotalComments, CounterKey::BoardComments(4)])
            .await
            .expect("read");
        assert_eq!(values, vec![0, 1]);
    }
}
