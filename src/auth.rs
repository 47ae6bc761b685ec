// src/auth.rs
use crate::error::ApiError;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenUser {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user: TokenUser,
    pub iat: usize,
    pub exp: usize,
}

/// Issues and verifies HS256 bearer tokens.
pub struct TokenService {
    secret: Vec<u8>,
    ttl_secs: u64,
}

impl TokenService {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        TokenService {
            secret: secret.as_bytes().to_vec(),
            ttl_secs,
        }
    }

    pub fn issue(&self, user_id: &str) -> Result<String, ApiError> {
        let now = Utc::now().timestamp().max(0) as usize;
        let exp = usize::try_from(self.ttl_secs)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| {
                error!("Token lifetime of {}s overflows the expiry", self.ttl_secs);
                ApiError::Internal("token expiry overflow".into())
            })?;
        let claims = Claims {
            user: TokenUser {
                id: user_id.to_string(),
            },
            iat: now,
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| {
            error!("Failed to sign token: {}", e);
            ApiError::Internal(e.to_string())
        })
    }

    /// Returns the user id the token was issued for.
    pub fn verify(&self, token: &str) -> Result<String, ApiError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims.user.id)
            .map_err(|e| {
                debug!("Rejected token: {}", e);
                ApiError::Unauthorized("Token is not valid".into())
            })
    }
}

/// Picks the credential out of `Authorization: Bearer ...` or, failing that,
/// the `x-auth-token` header.
pub fn extract_token(authorization: Option<&str>, legacy: Option<&str>) -> Result<String, ApiError> {
    let bearer = authorization
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let legacy = legacy.map(str::trim).filter(|t| !t.is_empty());

    bearer
        .or(legacy)
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthorized("No token, authorization denied".into()))
}

pub async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))
}

pub fn gravatar_url(email: &str) -> String {
    let digest = md5::compute(email.trim().to_lowercase().as_bytes());
    format!("https://www.gravatar.com/avatar/{:x}?s=200&r=g&d=mm", digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let tokens = TokenService::new("test-secret", 3600);
        let token = tokens.issue("user-1").unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), "user-1");
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let token = TokenService::new("a", 3600).issue("user-1").unwrap();
        let err = TokenService::new("b", 3600).verify(&token).unwrap_err();
        assert_eq!(err, ApiError::Unauthorized("Token is not valid".into()));
    }

    #[test]
    fn oversized_lifetime_is_an_error() {
        let err = TokenService::new("s", u64::MAX).issue("user-1").unwrap_err();
        assert_eq!(err, ApiError::Internal("token expiry overflow".into()));
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = TokenService::new("s", 0);
        let now = Utc::now().timestamp() as usize;
        let stale = encode(
            &Header::default(),
            &Claims {
                user: TokenUser { id: "u".into() },
                iat: now - 7200,
                exp: now - 3600,
            },
            &EncodingKey::from_secret(b"s"),
        )
        .unwrap();
        assert!(tokens.verify(&stale).is_err());
    }

    #[test]
    fn bearer_header_wins_over_legacy() {
        assert_eq!(
            extract_token(Some("Bearer abc"), Some("def")).unwrap(),
            "abc"
        );
        assert_eq!(extract_token(None, Some("def")).unwrap(), "def");
        assert_eq!(extract_token(Some("Basic xyz"), Some("def")).unwrap(), "def");
        assert!(extract_token(Some("Bearer "), None).is_err());
    }

    #[tokio::test]
    async fn password_hash_round_trip() {
        let hash = hash_password("Secret1".into(), 4).await.unwrap();
        assert!(verify_password("Secret1".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("secret1".into(), hash).await.unwrap());
    }

    #[test]
    fn gravatar_normalizes_email() {
        assert_eq!(
            gravatar_url(" Someone@Example.com "),
            gravatar_url("someone@example.com")
        );
        assert!(gravatar_url("a@b.co").starts_with("https://www.gravatar.com/avatar/"));
    }
}
