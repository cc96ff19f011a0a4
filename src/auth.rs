// SPDX-License-Identifier: MIT

//! Token verification.
//!
//! The gateway verifies the bearer token exactly once per connection. The
//! verifier is abstract so deployments can swap the token issuer without
//! touching the gateway; the production implementation validates HS256 JWTs.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// The identity bound to a connection after a successful handshake.
#[derive(Debug, Clone)]
pub struct VerifiedUser {
    pub user_id: String,
    pub email: Option<String>,
}

/// Turns an opaque bearer token into a stable user id. Idempotent, no side
/// effects; tokens are not re-verified per frame because connections are
/// short-lived relative to token expiry.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedUser>;
}

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
    /// Optional email claim
    #[serde(default)]
    pub email: Option<String>,
}

/// Production verifier: HS256 JWTs signed with the shared key.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(signing_key: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(signing_key),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedUser> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|_| AppError::Unauthenticated)?;

        if data.claims.sub.is_empty() {
            return Err(AppError::Unauthenticated);
        }

        Ok(VerifiedUser {
            user_id: data.claims.sub,
            email: data.claims.email,
        })
    }
}

/// Test verifier accepting `test:{user_id}` tokens, so integration tests can
/// drive the gateway without minting JWTs.
pub struct StaticVerifier;

#[async_trait]
impl TokenVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedUser> {
        match token.strip_prefix("test:") {
            Some(user_id) if !user_id.is_empty() => Ok(VerifiedUser {
                user_id: user_id.to_string(),
                email: None,
            }),
            _ => Err(AppError::Unauthenticated),
        }
    }
}

/// Mint a JWT for a user. Used by tests and operator tooling; the realtime
/// core itself never issues tokens.
pub fn create_jwt(user_id: &str, signing_key: &[u8]) -> anyhow::Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + 60 * 60, // 1 hour, matching client reconnect behavior
        email: None,
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )?)
}
