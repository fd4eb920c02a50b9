use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::auth::MIN_SECRET_LEN;
use crate::rate_limiter::{IdentifyBy, RateLimitRule};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub log_level: String,
    pub json_logs: bool,

    // Shared store
    pub redis_url: String,
    pub store_timeout_ms: u64,
    pub bucket_ttl_seconds: u64,

    // Identity
    pub trust_forwarded_for: bool,
    /// HS256 secret for bearer tokens. Unset means no request carries a user identity.
    pub auth_secret: Option<String>,

    // HTTP surface
    pub cors_origins: Vec<String>,
    pub max_body_bytes: usize,

    // Generative API
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_endpoint: String,
    pub gemini_timeout_seconds: u64,
    pub search_cache_ttl_seconds: u64,

    // Rate Limiting
    pub search_rate_limit: RateLimitRule,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            log_level: "INFO".to_string(),
            json_logs: false,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            store_timeout_ms: 250,
            bucket_ttl_seconds: 60,
            trust_forwarded_for: false,
            auth_secret: None,
            cors_origins: Vec::new(),
            max_body_bytes: 10 * 1024, // 10KB
            gemini_api_key: None,
            gemini_model: "gemini-2.5-flash".to_string(),
            gemini_endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_timeout_seconds: 30,
            search_cache_ttl_seconds: 24 * 60 * 60,
            search_rate_limit: RateLimitRule {
                scope_prefix: "search".to_string(),
                capacity: 5.0,
                refill_rate: 1.0,
                identify_by: IdentifyBy::Auto,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("MedAlt.toml"))
                .merge(Env::raw().split("__")),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self, Box<figment::Error>> {
        let config: Config = figment.extract().map_err(Box::new)?;
        config
            .validate()
            .map_err(|msg| Box::new(figment::Error::from(msg)))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.search_rate_limit.validate()?;
        if self.bucket_ttl_seconds == 0 {
            return Err("bucket_ttl_seconds must be positive".to_string());
        }
        if self.store_timeout_ms == 0 {
            return Err("store_timeout_ms must be positive".to_string());
        }
        if let Some(secret) = &self.auth_secret
            && secret.len() < MIN_SECRET_LEN
        {
            return Err(format!(
                "auth_secret must be at least {} bytes",
                MIN_SECRET_LEN
            ));
        }
        if self.cors_origins.iter().any(|origin| origin.trim() == "*") {
            return Err("cors_origins must list explicit origins, not \"*\"".to_string());
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn bucket_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bucket_ttl(), Duration::from_secs(60));
        assert_eq!(config.search_rate_limit.identify_by, IdentifyBy::Auto);
    }

    #[test]
    fn test_nested_rule_override() {
        let figment = Figment::from(Serialized::defaults(Config::default())).merge(
            Serialized::default(
                "search_rate_limit",
                RateLimitRule {
                    scope_prefix: "lookup".to_string(),
                    capacity: 2.0,
                    refill_rate: 0.5,
                    identify_by: IdentifyBy::User,
                },
            ),
        );
        let config = Config::from_figment(figment).unwrap();
        assert_eq!(config.search_rate_limit.scope_prefix, "lookup");
        assert_eq!(config.search_rate_limit.identify_by, IdentifyBy::User);
    }

    #[test]
    fn test_short_or_empty_secret_rejected() {
        let mut config = Config::default();
        config.auth_secret = Some(String::new());
        assert!(config.validate().is_err());
        config.auth_secret = Some("changeme".to_string());
        assert!(config.validate().is_err());
        config.auth_secret = Some("x".repeat(MIN_SECRET_LEN));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secret_unset_by_default() {
        assert!(Config::default().auth_secret.is_none());
    }

    #[test]
    fn test_wildcard_cors_origin_rejected() {
        let mut config = Config::default();
        config.cors_origins = vec!["https://medalt.example".to_string(), "*".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.contains("cors_origins"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = Config::default();
        config.search_rate_limit.capacity = 0.0;
        assert!(config.validate().is_err());
    }
}
