//! Bearer-token authentication for the REST API.
//!
//! Tokens are compact HS256 JWTs whose `id` claim is the owning user id for
//! every storage call made on behalf of the request.

use crate::errors::{AppError, AppResult};
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

const NO_TOKEN: &str = "Not authorized, no token";
const TOKEN_FAILED: &str = "Not authorized, token failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

#[derive(Clone)]
pub struct TokenAuthority {
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenAuthority {
    pub fn new(secret: &str, ttl_minutes: i64) -> AppResult<Self> {
        if secret.trim().is_empty() {
            return Err(AppError::Validation("JWT secret is required".to_string()));
        }
        let ttl = Duration::try_minutes(ttl_minutes)
            .filter(|ttl| *ttl > Duration::zero())
            .ok_or_else(|| AppError::Validation(format!("invalid token lifetime of {} minutes", ttl_minutes)))?;
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
            ttl,
        })
    }

    pub fn issue(&self, user_id: &str) -> AppResult<String> {
        let now = Utc::now();
        self.sign(&Claims {
            id: user_id.to_string(),
            iat: now.timestamp(),
            exp: now
                .checked_add_signed(self.ttl)
                .ok_or_else(|| AppError::Validation("token lifetime overflows the clock".to_string()))?
                .timestamp(),
        })
    }

    pub fn sign(&self, claims: &Claims) -> AppResult<String> {
        let header = Header {
            alg: "HS256".to_string(),
            typ: Some("JWT".to_string()),
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?)
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", signing_input, signature))
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        let mut parts = token.trim().split('.');
        let (Some(header_raw), Some(claims_raw), Some(signature_raw), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(token_failed());
        };

        let header: Header = decode_segment(header_raw)?;
        if header.alg != "HS256" {
            return Err(token_failed());
        }

        let signature = URL_SAFE_NO_PAD.decode(signature_raw).map_err(|_| token_failed())?;
        let mut mac = self.mac()?;
        mac.update(header_raw.as_bytes());
        mac.update(b".");
        mac.update(claims_raw.as_bytes());
        mac.verify_slice(&signature).map_err(|_| token_failed())?;

        let claims: Claims = decode_segment(claims_raw)?;
        if claims.exp <= Utc::now().timestamp() || claims.id.trim().is_empty() {
            return Err(token_failed());
        }
        Ok(claims)
    }

    fn mac(&self) -> AppResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|error| AppError::Internal(error.to_string()))
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(raw: &str) -> AppResult<T> {
    let bytes = URL_SAFE_NO_PAD.decode(raw).map_err(|_| token_failed())?;
    serde_json::from_slice(&bytes).map_err(|_| token_failed())
}

fn token_failed() -> AppError {
    AppError::Unauthorized(TOKEN_FAILED.to_string())
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<TokenAuthority>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let authority = Arc::<TokenAuthority>::from_ref(state);
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized(NO_TOKEN.to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Unauthorized(NO_TOKEN.to_string()))?;

        let claims = authority.verify(token).map_err(|error| {
            tracing::debug!(error = %error, "rejected bearer token");
            error
        })?;
        Ok(Self { id: claims.id })
    }
}

#[cfg(test)]
mod tests {
    use super::{Claims, TokenAuthority};
    use crate::errors::AppError;
    use chrono::Utc;

    #[test]
    fn issued_token_verifies_to_same_user() {
        let authority = TokenAuthority::new("secret", 30).expect("authority");
        let token = authority.issue("user-42").expect("token");
        let claims = authority.verify(&token).expect("valid");
        assert_eq!(claims.id, "user-42");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let issuer = TokenAuthority::new("secret-a", 30).expect("authority");
        let verifier = TokenAuthority::new("secret-b", 30).expect("authority");
        let token = issuer.issue("user-42").expect("token");
        assert!(matches!(verifier.verify(&token), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn expired_and_malformed_tokens_are_rejected() {
        let authority = TokenAuthority::new("secret", 30).expect("authority");
        let now = Utc::now().timestamp();
        let expired = authority
            .sign(&Claims {
                id: "user-42".to_string(),
                iat: now - 120,
                exp: now - 60,
            })
            .expect("token");
        assert!(authority.verify(&expired).is_err());
        assert!(authority.verify("not-a-token").is_err());
        assert!(authority.verify("a.b.c.d").is_err());
    }

    #[test]
    fn tampered_claims_fail_signature_check() {
        let authority = TokenAuthority::new("secret", 30).expect("authority");
        let token = authority.issue("alice").expect("token");
        let forged_claims = authority.issue("mallory").expect("token");
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = forged_claims.split('.').nth(1).expect("claims segment");
        assert!(authority.verify(&parts.join(".")).is_err());
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(TokenAuthority::new("  ", 30).is_err());
    }

    #[test]
    fn out_of_range_lifetimes_are_refused() {
        assert!(TokenAuthority::new("secret", 0).is_err());
        assert!(TokenAuthority::new("secret", i64::MAX).is_err());
        let long_lived = TokenAuthority::new("secret", 365 * 24 * 60).expect("authority");
        assert!(long_lived.issue("alice").is_ok());
    }
}
