use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

use crate::error::ApiError;

/// Signing secrets shorter than this are refused at startup.
pub const MIN_SECRET_LEN: usize = 32;

/// Identity attached to a request once its bearer token checks out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
}

/// HS256 claims. Tokens minted elsewhere may carry more fields (`iat`, ...); they are ignored.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    id: String,
    exp: u64,
}

struct SecretBytes(Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Issues and verifies HS256 JWTs whose `id` claim names the user.
pub struct TokenSigner {
    secret: SecretBytes,
    validation: Validation,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        Self {
            secret: SecretBytes(secret.as_bytes().to_vec()),
            validation,
        }
    }

    pub fn issue(&self, user_id: &str, expires_at: u64) -> Result<String, ApiError> {
        if user_id.is_empty() {
            return Err(ApiError::ValidationError("user id must be non-empty".to_string()));
        }
        let claims = Claims {
            id: user_id.to_string(),
            exp: expires_at,
        };
        let key = EncodingKey::from_secret(&self.secret.0);

        encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|e| {
            tracing::error!("Failed to encode token: {}", e);
            ApiError::ValidationError("could not sign token".to_string())
        })
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, ApiError> {
        let key = DecodingKey::from_secret(&self.secret.0);

        let claims = decode::<Claims>(token, &key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::Unauthorized("Token expired".to_string())
                }
                _ => ApiError::Unauthorized(format!("Invalid token: {}", e)),
            })?;

        if claims.id.is_empty() {
            return Err(ApiError::Unauthorized("Token has no user id".to_string()));
        }
        Ok(AuthenticatedUser { id: claims.id })
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Attaches `AuthenticatedUser` when a valid bearer token is present. Never rejects:
/// routes that need an identity enforce it further down the chain.
pub async fn attach_identity(
    State(signer): State<Arc<TokenSigner>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim);

    if let Some(token) = token {
        match signer.verify(token) {
            Ok(user) => {
                request.extensions_mut().insert(user);
            }
            Err(err) => {
                tracing::debug!("Ignoring bearer token: {}", err);
            }
        }
    }

    next.run(request).await
}
