//! Shared counter store for multi-instance deployments.
//!
//! The increment runs as a single Lua script so INCR and the window expiry
//! are applied atomically on the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};

use super::store::{now_ms, RateLimitEntry, RateLimitStore, StoreError};

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

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[derive(Clone)]
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    script: Script,
    prefix: String,
}

impl RedisRateLimitStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        Ok(Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
            prefix: "ratelimit:".to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn get(&self, key: &str) -> Result<Option<RateLimitEntry>, StoreError> {
        let key = self.key(key);
        let mut conn = self.conn.clone();
        let (count, ttl): (Option<u64>, i64) = redis::pipe()
            .cmd("GET")
            .arg(&key)
            .cmd("PTTL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(match count {
            Some(count) if ttl > 0 => Some(RateLimitEntry {
                count,
                reset_time_ms: now_ms() + ttl as u64,
            }),
            _ => None,
        })
    }

    async fn set(&self, key: &str, entry: RateLimitEntry) -> Result<(), StoreError> {
        let ttl = entry.reset_time_ms.saturating_sub(now_ms());
        if ttl == 0 {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg(entry.count)
            .arg("PX")
            .arg(ttl)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<RateLimitEntry, StoreError> {
        let mut conn = self.conn.clone();
        let (count, ttl): (u64, i64) = self
            .script
            .key(self.key(key))
            .arg(window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(RateLimitEntry {
            count,
            reset_time_ms: now_ms() + ttl.max(0) as u64,
        })
    }
}
