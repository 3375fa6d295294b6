//! Redis-backed state store for multi-process deployments.
//!
//! - Dedup uses `SET key 1 NX PX ttl`: atomic check-and-set with server-side expiry.
//! - Rate windows are sorted sets trimmed and counted inside one Lua script.
//! - Prior failure state uses `GETSET`, returning the previous flag atomically.
//!
//! Dedup expiry follows the Redis server clock; the `now` handed in by the
//! gate only timestamps rate-window members.
//!
//! The gate and the level resolver run synchronously on both the blocking and
//! the async entry points, so the store holds one blocking `Connection` behind
//! a mutex rather than an async `ConnectionManager`. Each call is a single
//! round trip; async callers block their worker thread for that long.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::{Client, Connection, Script};
use uuid::Uuid;

use probe_common::ProbeError;

use crate::store::StateStore;

/// Trim the window, count it, and record `now` only when under the limit.
const RATE_LIMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
if redis.call('ZCARD', key) >= max then
  return 0
end
redis.call('ZADD', key, now, ARGV[4])
redis.call('PEXPIRE', key, window)
return 1
"#;

pub struct RedisStore {
    conn: Mutex<Connection>,
    prefix: String,
    rate_script: Script,
}

impl RedisStore {
    /// Open a connection. Keys are namespaced under `prefix` (e.g. `"probe"`).
    pub fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, ProbeError> {
        let client = Client::open(redis_url)?;
        let conn = client.get_connection()?;

        tracing::info!("Connected to Redis state store");
        Ok(Self {
            conn: Mutex::new(conn),
            prefix: prefix.into(),
            rate_script: Script::new(RATE_LIMIT_SCRIPT),
        })
    }

    fn key(&self, kind: &str, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, kind, key)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
    ) -> Result<T, ProbeError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| ProbeError::Store("redis connection lock poisoned".to_string()))?;
        Ok(f(&mut conn)?)
    }
}

impl StateStore for RedisStore {
    fn check_and_set_dedup(
        &self,
        key: &str,
        ttl: Duration,
        _now: DateTime<Utc>,
    ) -> Result<bool, ProbeError> {
        let key = self.key("dedup", key);
        let ttl_ms = ttl.as_millis().max(1) as u64;

        // Returns Some("OK") if key was set (not a duplicate)
        // Returns None if key already exists (duplicate)
        let result: Option<String> = self.with_conn(|conn| {
            redis::cmd("SET")
                .arg(&key)
                .arg("1")
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query(conn)
        })?;

        Ok(result.is_some())
    }

    fn check_and_record_rate(
        &self,
        key: &str,
        window: Duration,
        max: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, ProbeError> {
        let key = self.key("rate", key);
        let member = format!("{}:{}", now.timestamp_millis(), Uuid::new_v4());

        let admitted: i64 = self.with_conn(|conn| {
            self.rate_script
                .key(&key)
                .arg(now.timestamp_millis())
                .arg(window.as_millis() as u64)
                .arg(max)
                .arg(&member)
                .invoke(conn)
        })?;

        Ok(admitted == 1)
    }

    fn swap_failing(&self, identity: &str, failing: bool) -> Result<bool, ProbeError> {
        let key = self.key("state", identity);
        let value = if failing { "1" } else { "0" };

        let previous: Option<String> =
            self.with_conn(|conn| redis::cmd("GETSET").arg(&key).arg(value).query(conn))?;

        Ok(previous.as_deref() == Some("1"))
    }

    fn clear_dedup(&self, key: &str) -> Result<(), ProbeError> {
        let key = self.key("dedup", key);
        self.with_conn(|conn| redis::cmd("DEL").arg(&key).query::<()>(conn))
    }
}
