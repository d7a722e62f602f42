//! Redis-backed key-value store.
//!
//! Every instance of the read side pointed at the same Redis shares its
//! markers, indexes and counters. Bundles are interpreted by one Lua script
//! so the guard check, all writes and the marker commit happen in a single
//! atomic step on the server.
//!
//! Sorted-set members are stored zero-padded so that Redis' lexicographic
//! tie-break on equal scores matches numeric id order.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::error::StoreError;
use super::mutation::{BundleResult, CacheMutation, MutationBundle};
use super::store::KeyValueStore;

/// Attempts at a watched pipeline before giving up on a contended marker.
const PIPELINE_ATTEMPTS: usize = 3;

const BUNDLE_SCRIPT: &str = r#"
local bundle = cjson.decode(ARGV[1])
local function int(n) return string.format('%d', n) end
local function member(n) return string.format('%020d', n) end

local function kind_of(key)
  return redis.call('TYPE', key).ok
end
local function expect_zset(key)
  local kind = kind_of(key)
  return kind == 'none' or kind == 'zset'
end
local function expect_integer(key)
  local kind = kind_of(key)
  if kind == 'none' then return true end
  if kind ~= 'string' then return false end
  return tonumber(redis.call('GET', key)) ~= nil
end
local function read_integer(key)
  return tonumber(redis.call('GET', key) or '0') or 0
end
local function add_counter(key, delta)
  local value = redis.call('INCRBY', key, int(delta))
  if value < 0 then redis.call('SET', key, '0') end
end

local guard = bundle.guard
if guard and not expect_integer(guard.key) then
  return redis.error_reply('WRONGTYPE marker ' .. guard.key)
end
for _, op in ipairs(bundle.ops) do
  local ok = true
  if op.op == 'zadd' or op.op == 'zrem' or op.op == 'ztrim' or op.op == 'del_members' then
    ok = expect_zset(op.key)
  elseif op.op == 'incr' then
    ok = expect_integer(op.key)
  elseif op.op == 'subtract' then
    ok = expect_integer(op.key) and expect_integer(op.by)
  end
  if not ok then
    return redis.error_reply('WRONGTYPE operation against ' .. op.key)
  end
end

if guard then
  local current = read_integer(guard.key)
  if guard.ts <= current then
    return {0, current}
  end
end

for _, op in ipairs(bundle.ops) do
  if op.op == 'put' then
    local args = {'SET', op.key, ARGV[op.value]}
    if op.ttl_ms then
      table.insert(args, 'PX')
      table.insert(args, int(op.ttl_ms))
    end
    if op.nx then table.insert(args, 'NX') end
    redis.call(unpack(args))
  elseif op.op == 'del' then
    redis.call('DEL', op.key)
  elseif op.op == 'zadd' then
    redis.call('ZADD', op.key, string.format('%.17g', op.score), member(op.member))
  elseif op.op == 'zrem' then
    redis.call('ZREM', op.key, member(op.member))
  elseif op.op == 'ztrim' then
    redis.call('ZREMRANGEBYRANK', op.key, 0, -(op.max + 1))
  elseif op.op == 'zreplace' then
    redis.call('DEL', op.key)
    for _, entry in ipairs(op.entries) do
      redis.call('ZADD', op.key, string.format('%.17g', entry[2]), member(entry[1]))
    end
  elseif op.op == 'incr' then
    add_counter(op.key, op.delta)
  elseif op.op == 'subtract' then
    local by = read_integer(op.by)
    if by ~= 0 then add_counter(op.key, -by) end
  elseif op.op == 'del_members' then
    for _, id in ipairs(redis.call('ZRANGE', op.key, 0, -1)) do
      redis.call('DEL', op.prefix .. int(tonumber(id)))
    end
  end
end

if guard then
  redis.call('SET', guard.key, int(guard.ts), 'PX', int(guard.ttl_ms))
end
return {1, 0}
"#;

const AFTER_SCRIPT: &str = r#"
local rank = redis.call('ZREVRANK', KEYS[1], ARGV[1])
if not rank then return false end
local count = tonumber(ARGV[2])
if count == 0 then return {} end
return redis.call('ZREVRANGE', KEYS[1], rank + 1, rank + count)
"#;

#[derive(Debug, Serialize)]
struct ScriptGuard<'a> {
    key: &'a str,
    ts: i64,
    ttl_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ScriptOp<'a> {
    Put {
        key: &'a str,
        /// Position of the value among the script's `ARGV`.
        value: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        ttl_ms: Option<u64>,
        nx: bool,
    },
    Del {
        key: &'a str,
    },
    Zadd {
        key: &'a str,
        member: i64,
        score: f64,
    },
    Zrem {
        key: &'a str,
        member: i64,
    },
    Ztrim {
        key: &'a str,
        max: usize,
    },
    Zreplace {
        key: &'a str,
        entries: &'a [(i64, f64)],
    },
    Incr {
        key: &'a str,
        delta: i64,
    },
    Subtract {
        key: &'a str,
        by: &'a str,
    },
    DelMembers {
        key: &'a str,
        prefix: &'a str,
    },
}

#[derive(Debug, Serialize)]
struct ScriptBundle<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    guard: Option<ScriptGuard<'a>>,
    ops: Vec<ScriptOp<'a>>,
}

/// Script arguments for a bundle: the JSON program followed by the raw
/// snapshot bytes it references.
#[derive(Debug)]
struct EncodedBundle<'a> {
    program: String,
    values: Vec<&'a [u8]>,
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

fn encode_bundle(bundle: &MutationBundle) -> Result<EncodedBundle<'_>, StoreError> {
    let mut values: Vec<&[u8]> = Vec::new();
    let ops = bundle
        .mutations
        .iter()
        .map(|mutation| match mutation {
            CacheMutation::PutDetail {
                key,
                bytes,
                ttl,
                only_if_absent,
            } => {
                values.push(bytes);
                ScriptOp::Put {
                    key,
                    // ARGV[1] is the program itself.
                    value: values.len() + 1,
                    ttl_ms: ttl.map(millis),
                    nx: *only_if_absent,
                }
            }
            CacheMutation::DeleteKey { key } => ScriptOp::Del { key },
            CacheMutation::IndexAdd {
                index,
                member,
                score,
            } => ScriptOp::Zadd {
                key: index,
                member: *member,
                score: *score,
            },
            CacheMutation::IndexRemove { index, member } => ScriptOp::Zrem {
                key: index,
                member: *member,
            },
            CacheMutation::IndexTrim { index, max_size } => ScriptOp::Ztrim {
                key: index,
                max: *max_size,
            },
            CacheMutation::IndexReplace { index, entries } => ScriptOp::Zreplace {
                key: index,
                entries,
            },
            CacheMutation::CounterDelta { key, delta } => ScriptOp::Incr { key, delta: *delta },
            CacheMutation::CounterSubtract { key, by_key } => ScriptOp::Subtract { key, by: by_key },
            CacheMutation::DeleteIndexedKeys { index, key_prefix } => ScriptOp::DelMembers {
                key: index,
                prefix: key_prefix,
            },
        })
        .collect();

    let script = ScriptBundle {
        guard: bundle.guard.as_ref().map(|guard| ScriptGuard {
            key: &guard.marker_key,
            ts: guard.incoming_ts,
            ttl_ms: millis(guard.ttl),
        }),
        ops,
    };
    let program = serde_json::to_string(&script)
        .map_err(|err| StoreError::command(format!("failed to encode bundle: {err}")))?;
    Ok(EncodedBundle { program, values })
}

fn bundle_result((applied, last_applied_ts): (i64, i64)) -> BundleResult {
    if applied == 1 {
        BundleResult::Applied
    } else {
        BundleResult::Stale { last_applied_ts }
    }
}

fn padded(member: i64) -> String {
    format!("{member:020}")
}

fn parse_members(members: Vec<String>) -> Result<Vec<i64>, StoreError> {
    members
        .into_iter()
        .map(|member| {
            member
                .parse::<i64>()
                .map_err(|_| StoreError::command(format!("non-numeric index member `{member}`")))
        })
        .collect()
}

fn parse_integer(raw: Option<String>) -> Result<Option<i64>, StoreError> {
    raw.map(|value| {
        value
            .parse::<i64>()
            .map_err(|_| StoreError::command(format!("non-integer value `{value}`")))
    })
    .transpose()
}

fn store_error(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        StoreError::unavailable(err.to_string())
    } else {
        StoreError::command(err.to_string())
    }
}

/// Store shared by every instance pointed at the same Redis.
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
    bundle_script: Script,
    after_script: Script,
}

impl RedisStore {
    /// Open a managed connection to `url` and verify it answers.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(store_error)?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(store_error)?;
        let store = Self {
            client,
            manager,
            bundle_script: Script::new(BUNDLE_SCRIPT),
            after_script: Script::new(AFTER_SCRIPT),
        };
        let _: String = redis::cmd("PING")
            .query_async(&mut store.manager.clone())
            .await
            .map_err(store_error)?;
        info!("Connected to shared key-value store");
        Ok(store)
    }

    /// Re-check a watched marker after an aborted transaction.
    async fn marker(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(store_error)?;
        parse_integer(raw)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(store_error)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(store_error)
    }

    async fn get_integers(&self, keys: &[String]) -> Result<Vec<Option<i64>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(store_error)?;
        raw.into_iter().map(parse_integer).collect()
    }

    async fn index_range(
        &self,
        index: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<i64>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let members: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(index)
            .arg(start)
            .arg(start + count - 1)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(store_error)?;
        parse_members(members)
    }

    async fn index_after(
        &self,
        index: &str,
        member: i64,
        count: usize,
    ) -> Result<Option<Vec<i64>>, StoreError> {
        let members: Option<Vec<String>> = self
            .after_script
            .key(index)
            .arg(padded(member))
            .arg(count)
            .invoke_async(&mut self.manager.clone())
            .await
            .map_err(store_error)?;
        members.map(parse_members).transpose()
    }

    async fn index_len(&self, index: &str) -> Result<u64, StoreError> {
        redis::cmd("ZCARD")
            .arg(index)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(store_error)
    }

    #[instrument(skip(self, bundle), fields(mutations = bundle.mutations.len()))]
    async fn execute_script(&self, bundle: &MutationBundle) -> Result<BundleResult, StoreError> {
        let encoded = encode_bundle(bundle)?;
        let mut invocation = self.bundle_script.prepare_invoke();
        invocation.arg(&encoded.program);
        for value in &encoded.values {
            invocation.arg(*value);
        }
        let reply: (i64, i64) = invocation
            .invoke_async(&mut self.manager.clone())
            .await
            .map_err(store_error)?;
        Ok(bundle_result(reply))
    }

    /// Watch the marker on a dedicated connection and send the bundle in one
    /// MULTI/EXEC batch. A marker moved by another writer aborts the batch.
    #[instrument(skip(self, bundle), fields(mutations = bundle.mutations.len()))]
    async fn execute_pipeline(
        &self,
        bundle: &MutationBundle,
    ) -> Result<BundleResult, StoreError> {
        let encoded = encode_bundle(bundle)?;
        // WATCH state is per connection, so it cannot ride the shared one.
        let mut connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error)?;

        for attempt in 1..=PIPELINE_ATTEMPTS {
            if let Some(guard) = &bundle.guard {
                let _: () = redis::cmd("WATCH")
                    .arg(&guard.marker_key)
                    .query_async(&mut connection)
                    .await
                    .map_err(store_error)?;
                let raw: Option<String> = redis::cmd("GET")
                    .arg(&guard.marker_key)
                    .query_async(&mut connection)
                    .await
                    .map_err(store_error)?;
                let current = parse_integer(raw)?;
                if !guard.admits(current) {
                    let _: () = redis::cmd("UNWATCH")
                        .query_async(&mut connection)
                        .await
                        .map_err(store_error)?;
                    return Ok(BundleResult::Stale {
                        last_applied_ts: current.unwrap_or(0),
                    });
                }
            }

            let mut eval = redis::cmd("EVAL");
            eval.arg(BUNDLE_SCRIPT).arg(0).arg(&encoded.program);
            for value in &encoded.values {
                eval.arg(*value);
            }
            let mut pipe = redis::pipe();
            pipe.atomic().add_command(eval);

            let reply: Option<Vec<(i64, i64)>> = pipe
                .query_async(&mut connection)
                .await
                .map_err(store_error)?;
            match reply.and_then(|replies| replies.into_iter().next()) {
                Some(reply) => return Ok(bundle_result(reply)),
                None => {
                    let Some(guard) = &bundle.guard else {
                        return Err(StoreError::command("unwatched pipeline aborted"));
                    };
                    let current = self.marker(&guard.marker_key).await?;
                    if !guard.admits(current) {
                        return Ok(BundleResult::Stale {
                            last_applied_ts: current.unwrap_or(0),
                        });
                    }
                    debug!(attempt, "Watched marker changed; retrying pipeline");
                }
            }
        }

        Err(StoreError::command(format!(
            "marker stayed contended after {PIPELINE_ATTEMPTS} attempts"
        )))
    }
}
