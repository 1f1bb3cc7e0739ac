use crate::{
    config::AuthConfig,
    error::{ApiError, Result},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

pub const ADMIN_ROLE: &str = "admin";

/// Claims issued by the identity provider
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject, the opaque user id
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Verifies HS256 bearer tokens signed with the shared secret
pub struct JWTService {
    config: Arc<AuthConfig>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JWTService {
    pub fn new(config: Arc<AuthConfig>) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// Sign a token the way the identity provider does. Used by local tooling and tests.
    pub fn generate_token(
        &self,
        user_id: &str,
        role: Option<&str>,
        ttl: time::Duration,
    ) -> Result<String> {
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let claims = Claims {
            sub: user_id.to_string(),
            role: role.map(str::to_string),
            iss: self.config.issuer.clone(),
            iat: now,
            exp: now + ttl.whole_seconds(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(e.into()))
    }

    /// Validate signature, expiry and (when configured) issuer
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(ref issuer) = self.config.issuer {
            validation.set_issuer(&[issuer]);
        }

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => ApiError::ExpiredToken,
                _ => ApiError::InvalidToken(e.to_string()),
            }
        })?;

        if token_data.claims.sub.trim().is_empty() {
            return Err(ApiError::InvalidToken("Empty subject".to_string()));
        }

        Ok(token_data.claims)
    }

    /// Admin via the role claim or the configured allow-list
    pub fn is_admin(&self, claims: &Claims) -> bool {
        claims.role.as_deref() == Some(ADMIN_ROLE)
            || self.config.admin_user_ids.iter().any(|id| id == &claims.sub)
    }
}
