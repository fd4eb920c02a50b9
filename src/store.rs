//! Bucket storage backends.
//!
//! Every backend performs the refill-then-maybe-consume step as one indivisible
//! operation per key. Redis gets this from running the update as a Lua script;
//! the in-memory backend holds a single async mutex across the whole update.

use async_trait::async_trait;
use redis::{Script, aio::ConnectionManager};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;

/// Inputs to one atomic bucket update.
#[derive(Debug, Clone, Copy)]
pub struct BucketParams {
    pub capacity: f64,
    /// Tokens per second.
    pub refill_rate: f64,
    pub now_ms: u64,
    pub ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TakeOutcome {
    /// One token was consumed; `remaining` is what is left afterwards.
    Taken { remaining: f64 },
    /// Fewer than one token was available after refill; nothing was written.
    Exhausted { available: f64 },
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn take(&self, key: &str, params: BucketParams) -> Result<TakeOutcome, StoreError>;
}

/// Same arithmetic as the Lua script below.
pub fn refill(
    tokens: f64,
    last_refill_ms: u64,
    capacity: f64,
    refill_rate: f64,
    now_ms: u64,
) -> f64 {
    let delta_secs = now_ms.saturating_sub(last_refill_ms) as f64 / 1000.0;
    (tokens + delta_secs * refill_rate).min(capacity)
}

const TAKE_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl_ms = tonumber(ARGV[4])

local data = redis.call("HMGET", key, "tokens", "lastRefill")
local tokens = tonumber(data[1])
local last_refill = tonumber(data[2])

if tokens == nil or last_refill == nil then
  tokens = capacity
  last_refill = now
end

local delta = math.max(0, now - last_refill)
tokens = math.min(capacity, tokens + (delta / 1000) * refill_rate)

if tokens < 1 then
  return {0, tostring(tokens)}
end

tokens = tokens - 1
last_refill = math.max(last_refill, now)
redis.call("HSET", key, "tokens", tostring(tokens), "lastRefill", tostring(last_refill))
redis.call("PEXPIRE", key, ttl_ms)

return {1, tostring(tokens)}
"#;

/// Redis-backed bucket store. The connection manager reconnects on its own; the
/// owning service decides when to connect and when to drop it.
pub struct RedisBucketStore {
    connection_manager: ConnectionManager,
    script: Script,
}

impl RedisBucketStore {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection_manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;

        let mut conn = connection_manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        debug!("Connected to bucket store at {}", url);

        Ok(Self::from_connection(connection_manager))
    }

    pub fn from_connection(connection_manager: ConnectionManager) -> Self {
        Self {
            connection_manager,
            script: Script::new(TAKE_SCRIPT),
        }
    }

    pub fn connection(&self) -> ConnectionManager {
        self.connection_manager.clone()
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn take(&self, key: &str, params: BucketParams) -> Result<TakeOutcome, StoreError> {
        let mut conn = self.connection_manager.clone();
        let ttl_ms = params.ttl.as_millis().max(1) as u64;

        let (taken, tokens): (i64, String) = self
            .script
            .key(key)
            .arg(params.capacity)
            .arg(params.refill_rate)
            .arg(params.now_ms)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        let tokens: f64 = tokens.parse().map_err(|_| {
            StoreError::OperationFailed(format!("unexpected token count {:?} for {}", tokens, key))
        })?;

        Ok(if taken == 1 {
            TakeOutcome::Taken { remaining: tokens }
        } else {
            TakeOutcome::Exhausted { available: tokens }
        })
    }
}

#[derive(Debug, Clone)]
struct BucketState {
    tokens: f64,
    last_refill_ms: u64,
    expires_at_ms: u64,
}

/// Single-process bucket store with the same semantics as the Redis script,
/// including expiry measured from the last write.
pub struct MemoryBucketStore {
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub async fn contains(&self, key: &str, now_ms: u64) -> bool {
        let buckets = self.buckets.lock().await;
        buckets
            .get(key)
            .is_some_and(|state| now_ms < state.expires_at_ms)
    }

    pub async fn tokens(&self, key: &str, now_ms: u64) -> Option<f64> {
        let buckets = self.buckets.lock().await;
        buckets
            .get(key)
            .filter(|state| now_ms < state.expires_at_ms)
            .map(|state| state.tokens)
    }
}

impl Default for MemoryBucketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn take(&self, key: &str, params: BucketParams) -> Result<TakeOutcome, StoreError> {
        let now = params.now_ms;
        let mut buckets = self.buckets.lock().await;
        buckets.retain(|_, state| now < state.expires_at_ms);

        let (tokens, last_refill_ms) = buckets
            .get(key)
            .map(|state| (state.tokens, state.last_refill_ms))
            .unwrap_or((params.capacity, now));

        let tokens = refill(tokens, last_refill_ms, params.capacity, params.refill_rate, now);
        if tokens < 1.0 {
            return Ok(TakeOutcome::Exhausted { available: tokens });
        }

        let remaining = tokens - 1.0;
        buckets.insert(
            key.to_string(),
            BucketState {
                tokens: remaining,
                last_refill_ms: last_refill_ms.max(now),
                expires_at_ms: now.saturating_add(params.ttl.as_millis() as u64),
            },
        );
        Ok(TakeOutcome::Taken { remaining })
    }
}

/// Installed when the shared store could not be reached at startup. Every call
/// fails, so the limiter admits everything until the service is restarted.
pub struct DisconnectedStore {
    reason: String,
}

impl DisconnectedStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl BucketStore for DisconnectedStore {
    async fn take(&self, _key: &str, _params: BucketParams) -> Result<TakeOutcome, StoreError> {
        Err(StoreError::Unavailable(self.reason.clone()))
    }
}
