use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use crate::models::Alternatives;

const KEY_PREFIX: &str = "alternatives";

/// Search result cache. Failures degrade to misses.
#[async_trait]
pub trait SearchCache: Send + Sync {
    async fn get(&self, normalized_name: &str) -> Option<Alternatives>;
    async fn put(&self, normalized_name: &str, value: &Alternatives);
}

pub fn cache_key(normalized_name: &str) -> String {
    format!("{}:{}", KEY_PREFIX, normalized_name)
}

pub struct RedisSearchCache {
    connection_manager: Option<ConnectionManager>,
    ttl: Duration,
    timeout: Duration,
}

impl RedisSearchCache {
    /// `None` disables caching, e.g. when the store was unreachable at startup.
    pub fn new(
        connection_manager: Option<ConnectionManager>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            connection_manager,
            ttl,
            timeout,
        }
    }
}

#[async_trait]
impl SearchCache for RedisSearchCache {
    async fn get(&self, normalized_name: &str) -> Option<Alternatives> {
        let mut conn = self.connection_manager.clone()?;
        let key = cache_key(normalized_name);

        let value: Option<String> = match tokio::time::timeout(
            self.timeout,
            redis::cmd("GET")
                .arg(&key)
                .query_async::<Option<String>>(&mut conn),
        )
        .await
        {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(key = %key, "Search cache GET error: {}", e);
                return None;
            }
            Err(_) => {
                warn!(key = %key, "Search cache GET timed out");
                return None;
            }
        };

        value.and_then(|json| match serde_json::from_str(&json) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(key = %key, "Discarding unreadable cache entry: {}", e);
                None
            }
        })
    }

    async fn put(&self, normalized_name: &str, value: &Alternatives) {
        let Some(mut conn) = self.connection_manager.clone() else {
            return;
        };
        let key = cache_key(normalized_name);
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, "Search cache serialize error: {}", e);
                return;
            }
        };

        let result = tokio::time::timeout(
            self.timeout,
            redis::cmd("SET")
                .arg(&key)
                .arg(json)
                .arg("EX")
                .arg(self.ttl.as_secs().max(1))
                .query_async::<()>(&mut conn),
        )
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(key = %key, "Search cache SET error: {}", e),
            Err(_) => warn!(key = %key, "Search cache SET timed out"),
        }
    }
}

/// Process-local cache for development and tests.
#[derive(Default)]
pub struct MemorySearchCache {
    entries: RwLock<HashMap<String, Alternatives>>,
}

impl MemorySearchCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SearchCache for MemorySearchCache {
    async fn get(&self, normalized_name: &str) -> Option<Alternatives> {
        self.entries
            .read()
            .await
            .get(&cache_key(normalized_name))
            .cloned()
    }

    async fn put(&self, normalized_name: &str, value: &Alternatives) {
        self.entries
            .write()
            .await
            .insert(cache_key(normalized_name), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Alternative;

    #[tokio::test]
    async fn test_disabled_redis_cache_always_misses() {
        let cache = RedisSearchCache::new(None, Duration::from_secs(60), Duration::from_millis(50));
        let value = Alternatives {
            alternatives: vec![Alternative {
                name: "Calpol".to_string(),
                price: "30 INR".to_string(),
                link: None,
            }],
        };
        cache.put("paracetamol", &value).await;
        assert!(cache.get("paracetamol").await.is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_round_trip() {
        let cache = MemorySearchCache::new();
        assert!(cache.get("crocin").await.is_none());
        cache.put("crocin", &Alternatives::default()).await;
        assert_eq!(cache.get("crocin").await, Some(Alternatives::default()));
    }

    #[test]
    fn test_cache_key_is_namespaced() {
        assert_eq!(cache_key("dolo 650"), "alternatives:dolo 650");
    }
}
