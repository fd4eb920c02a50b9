use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, StoreError};
use crate::store::{BucketParams, BucketStore, TakeOutcome};

const DEFAULT_BUCKET_TTL: Duration = Duration::from_secs(60);
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);
const UNKNOWN_CALLER: &str = "unknown";

/// How the caller behind a request is identified.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifyBy {
    Ip,
    User,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    User,
    Ip,
}

impl IdentifyBy {
    /// Sources tried in order; the first one that yields a value wins.
    pub fn strategies(self) -> &'static [IdentitySource] {
        match self {
            Self::User => &[IdentitySource::User],
            Self::Ip => &[IdentitySource::Ip],
            Self::Auto => &[IdentitySource::User, IdentitySource::Ip],
        }
    }
}

impl IdentitySource {
    fn resolve(self, caller: &CallerContext) -> Option<String> {
        match self {
            Self::User => caller.user_id.clone(),
            Self::Ip => caller.ip.map(|ip| ip.to_string()),
        }
    }
}

/// Per-route limiter settings, fixed at wiring time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub scope_prefix: String,
    pub capacity: f64,
    /// Tokens per second.
    pub refill_rate: f64,
    #[serde(default)]
    pub identify_by: IdentifyBy,
}

impl RateLimitRule {
    pub fn validate(&self) -> Result<(), String> {
        if self.scope_prefix.trim().is_empty() {
            return Err("rate limit scope_prefix must not be empty".to_string());
        }
        if !(self.capacity.is_finite() && self.capacity > 0.0) {
            return Err(format!(
                "rate limit capacity for {} must be positive",
                self.scope_prefix
            ));
        }
        if !(self.refill_rate.is_finite() && self.refill_rate > 0.0) {
            return Err(format!(
                "rate limit refill_rate for {} must be positive",
                self.scope_prefix
            ));
        }
        Ok(())
    }
}

/// What is known about the caller when the limiter runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    pub user_id: Option<String>,
    pub ip: Option<IpAddr>,
}

impl CallerContext {
    pub fn from_request(request: &Request, trust_forwarded_for: bool) -> Self {
        let user_id = request
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.id.clone());

        let forwarded = if trust_forwarded_for {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse::<IpAddr>().ok())
        } else {
            None
        };

        let ip = forwarded.or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        });

        Self { user_id, ip }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Admitted,
    Rejected { retry_after: Option<Duration> },
    Unauthorized,
}

/// Store faults never block the protected action.
pub fn fail_open(key: &str, err: &StoreError) -> Decision {
    warn!(key = %key, error = %err, "Rate limiter store failure, failing open");
    Decision::Admitted
}

/// Token bucket limiter backed by a shared store.
///
/// Holds no bucket state of its own: each `admit` is exactly one atomic call to the
/// store, or none when the caller cannot be identified.
pub struct RateLimiter {
    rule: RateLimitRule,
    store: Arc<dyn BucketStore>,
    bucket_ttl: Duration,
    store_timeout: Duration,
    trust_forwarded_for: bool,
}

impl RateLimiter {
    pub fn new(rule: RateLimitRule, store: Arc<dyn BucketStore>) -> Self {
        Self {
            rule,
            store,
            bucket_ttl: DEFAULT_BUCKET_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            trust_forwarded_for: false,
        }
    }

    pub fn with_bucket_ttl(mut self, ttl: Duration) -> Self {
        self.bucket_ttl = ttl;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn trusting_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Resolves the bucket identifier, or `None` when the rule demands an identity
    /// the caller does not have.
    pub fn identify(&self, caller: &CallerContext) -> Option<String> {
        let resolved = self
            .rule
            .identify_by
            .strategies()
            .iter()
            .find_map(|source| source.resolve(caller));

        match (resolved, self.rule.identify_by) {
            (Some(id), _) => Some(id),
            (None, IdentifyBy::User) => None,
            (None, _) => Some(UNKNOWN_CALLER.to_string()),
        }
    }

    pub fn bucket_key(&self, identifier: &str) -> String {
        format!("{}:{}", self.rule.scope_prefix, identifier)
    }

    pub async fn admit(&self, caller: &CallerContext) -> Decision {
        self.admit_at(caller, now_ms()).await
    }

    pub async fn admit_at(&self, caller: &CallerContext, now_ms: u64) -> Decision {
        let Some(identifier) = self.identify(caller) else {
            return Decision::Unauthorized;
        };
        let key = self.bucket_key(&identifier);

        let params = BucketParams {
            capacity: self.rule.capacity,
            refill_rate: self.rule.refill_rate,
            now_ms,
            ttl: self.bucket_ttl,
        };

        let outcome =
            match tokio::time::timeout(self.store_timeout, self.store.take(&key, params)).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.store_timeout)),
            };

        match outcome {
            Ok(TakeOutcome::Taken { .. }) => Decision::Admitted,
            Ok(TakeOutcome::Exhausted { available }) => {
                let retry_after = retry_hint(available, self.rule.refill_rate);
                info!(key = %key, "Rate limit exceeded");
                Decision::Rejected { retry_after }
            }
            Err(err) => fail_open(&key, &err),
        }
    }
}

fn retry_hint(available: f64, refill_rate: f64) -> Option<Duration> {
    let secs = (1.0 - available) / refill_rate;
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Middleware gating the wrapped routes on `limiter`.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let caller = CallerContext::from_request(&request, limiter.trust_forwarded_for);

    match limiter.admit(&caller).await {
        Decision::Admitted => next.run(request).await,
        Decision::Rejected { retry_after } => {
            ApiError::RateLimitExceeded { retry_after }.into_response()
        }
        Decision::Unauthorized => {
            ApiError::Unauthorized("Unauthorized".to_string()).into_response()
        }
    }
}
