//! Redis-backed counters shared across API instances.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::Script;

use super::{CounterError, CounterStore, WindowCount};

/// INCR and, on the first hit of a window, PEXPIRE in one server-side step.
/// Returns `{count, pttl}`.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

pub struct RedisCounterStore {
    conn: MultiplexedConnection,
    script: Script,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CounterError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CounterError::Unavailable(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| CounterError::Unavailable(format!("redis connect failed: {e}")))?;
        Ok(Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
        })
    }
}

#[async_trait::async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, CounterError> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis().max(1) as u64;
        let (count, ttl_ms): (u64, i64) = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CounterError::Unavailable(format!("redis increment failed: {e}")))?;
        Ok(WindowCount {
            count,
            resets_in: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn current(&self, key: &str) -> Result<Option<WindowCount>, CounterError> {
        let mut conn = self.conn.clone();
        let (count, ttl_ms): (Option<u64>, i64) = redis::pipe()
            .get(key)
            .pttl(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CounterError::Unavailable(format!("redis read failed: {e}")))?;
        Ok(count.filter(|_| ttl_ms > 0).map(|count| WindowCount {
            count,
            resets_in: Duration::from_millis(ttl_ms as u64),
        }))
    }
}

impl core::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}
