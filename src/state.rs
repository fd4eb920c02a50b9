use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenSigner;
use crate::cache::{RedisSearchCache, SearchCache};
use crate::config::Config;
use crate::gemini::{AlternativesProvider, GeminiClient};
use crate::rate_limiter::RateLimiter;
use crate::store::{BucketStore, DisconnectedStore, RedisBucketStore};

const STORE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state shared across all route handlers. Immutable after startup.
pub struct AppState {
    pub config: Config,
    /// `None` when no `auth_secret` is configured; bearer tokens are then ignored.
    pub signer: Option<Arc<TokenSigner>>,
    pub search_limiter: Arc<RateLimiter>,
    pub provider: Arc<dyn AlternativesProvider>,
    pub cache: Arc<dyn SearchCache>,
}

impl AppState {
    /// Connects the shared store and wires every collaborator from `config`.
    /// An unreachable store does not stop startup: the limiter fails open and the
    /// search cache is disabled. Fails only if the HTTP client cannot be built.
    pub async fn new(config: Config) -> Result<Self, reqwest::Error> {
        let (bucket_store, connection) =
            match RedisBucketStore::connect(&config.redis_url, STORE_CONNECT_TIMEOUT).await {
                Ok(store) => {
                    let connection = store.connection();
                    (Arc::new(store) as Arc<dyn BucketStore>, Some(connection))
                }
                Err(err) => {
                    tracing::warn!(
                        "Shared store unreachable at startup, rate limiting will fail open: {}",
                        err
                    );
                    (
                        Arc::new(DisconnectedStore::new(err.to_string())) as Arc<dyn BucketStore>,
                        None,
                    )
                }
            };

        let cache = Arc::new(RedisSearchCache::new(
            connection,
            Duration::from_secs(config.search_cache_ttl_seconds),
            config.store_timeout(),
        ));

        let provider = Arc::new(GeminiClient::new(
            &config.gemini_endpoint,
            &config.gemini_model,
            config.gemini_api_key.clone(),
            Duration::from_secs(config.gemini_timeout_seconds),
        )?);

        Ok(Self::with_parts(config, bucket_store, provider, cache))
    }

    pub fn with_parts(
        config: Config,
        bucket_store: Arc<dyn BucketStore>,
        provider: Arc<dyn AlternativesProvider>,
        cache: Arc<dyn SearchCache>,
    ) -> Self {
        let search_limiter = RateLimiter::new(config.search_rate_limit.clone(), bucket_store)
            .with_bucket_ttl(config.bucket_ttl())
            .with_store_timeout(config.store_timeout())
            .trusting_forwarded_for(config.trust_forwarded_for);

        let signer = match &config.auth_secret {
            Some(secret) => Some(Arc::new(TokenSigner::new(secret))),
            None => {
                tracing::warn!("auth_secret is not set, requests carry no user identity");
                None
            }
        };

        Self {
            signer,
            search_limiter: Arc::new(search_limiter),
            provider,
            cache,
            config,
        }
    }
}

pub type SharedState = Arc<AppState>;
