//! Bearer tokens and the login stub
//!
//! The login endpoint is part of the deception surface, not a real
//! authentication system. It captures credentials in the clear, answers 401
//! when a username was already seen, and randomly rejects about half of the
//! otherwise-valid attempts to look like a flaky internal service. None of
//! this is a defect.

use crate::error::{ApiError, ApiResult};
use crate::storage::Storage;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Token claims: subject, issuing client, issue/expiry epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub ip: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS512 token issuing and verification.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    /// Issue a token for a freshly captured login.
    pub fn issue(&self, username: &str, client_ip: &str) -> ApiResult<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: username.to_string(),
            ip: client_ip.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS512), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("token encoding failed: {e}")))
    }

    /// Verify a presented token. Expired or malformed tokens verify to
    /// nothing; the caller decides whether that matters.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        let validation = Validation::new(Algorithm::HS512);
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .ok()
    }
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response body
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
}

/// The honeypot login service.
pub struct LoginService {
    storage: Arc<dyn Storage>,
    tokens: TokenIssuer,
}

impl LoginService {
    pub fn new(storage: Arc<dyn Storage>, tokens: TokenIssuer) -> Self {
        Self { storage, tokens }
    }

    /// Capture credentials and maybe hand out a token.
    ///
    /// Reused usernames are always rejected; fresh ones are still turned
    /// away on a coin flip after the credentials are stored.
    pub async fn login(&self, request: LoginRequest, client_ip: &str) -> ApiResult<LoginResponse> {
        if self.storage.username_exists(&request.username).await? {
            return Err(ApiError::Unauthorized(
                "Invalid username or password".to_string(),
            ));
        }

        self.storage
            .insert_user(&request.username, &request.password, client_ip)
            .await?;

        tracing::info!(username = %request.username, client_ip, "captured login attempt");

        if !rand::random::<bool>() {
            return Err(ApiError::Unauthorized(
                "Invalid username or password".to_string(),
            ));
        }

        let access_token = self.tokens.issue(&request.username, client_ip)?;
        Ok(LoginResponse { access_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::storage::UserStore;

    #[test]
    fn issued_tokens_verify_and_carry_claims() {
        let issuer = TokenIssuer::new("secret", 9000);
        let token = issuer.issue("scanner", "10.0.0.1").unwrap();

        let claims = issuer.verify(&token).expect("token should verify");
        assert_eq!(claims.sub, "scanner");
        assert_eq!(claims.ip, "10.0.0.1");
        assert_eq!(claims.exp - claims.iat, 9000);
    }

    #[test]
    fn expired_tokens_do_not_verify() {
        let issuer = TokenIssuer::new("secret", -120);
        let token = issuer.issue("scanner", "10.0.0.1").unwrap();
        assert!(issuer.verify(&token).is_none());
    }

    #[test]
    fn foreign_secrets_do_not_verify() {
        let issuer = TokenIssuer::new("secret-a", 9000);
        let other = TokenIssuer::new("secret-b", 9000);
        let token = issuer.issue("scanner", "10.0.0.1").unwrap();
        assert!(other.verify(&token).is_none());
        assert!(issuer.verify("not-a-token").is_none());
    }

    async fn attempt(service: &LoginService) -> ApiResult<LoginResponse> {
        service
            .login(
                LoginRequest {
                    username: "root".to_string(),
                    password: "toor".to_string(),
                },
                "10.0.0.1",
            )
            .await
    }

    #[tokio::test]
    async fn credentials_are_captured_even_when_rejected() {
        let storage = Arc::new(InMemoryStorage::new());
        let service = LoginService::new(storage.clone(), TokenIssuer::new("secret", 9000));

        // First attempt may pass or lose the coin flip; either way the
        // credentials are stored.
        let _ = attempt(&service).await;
        assert!(storage.username_exists("root").await.unwrap());
    }

    #[tokio::test]
    async fn reused_usernames_are_always_rejected() {
        let storage = Arc::new(InMemoryStorage::new());
        let service = LoginService::new(storage.clone(), TokenIssuer::new("secret", 9000));

        let _ = attempt(&service).await;

        // Once the username exists the coin flip never runs: 401 every time.
        for _ in 0..8 {
            assert!(matches!(
                attempt(&service).await,
                Err(ApiError::Unauthorized(_))
            ));
        }
    }
}
