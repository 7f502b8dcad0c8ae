//! JWT credential verification (HS256).

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use crate::domain::{AuthError, Claims, TokenVerifier};

/// Verifies bearer tokens against a shared HS256 secret.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::default(), // HS256
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            })
    }
}

/// Issue a token for a user. Used by tests and local tooling; production
/// deployments verify tokens minted by the auth service.
pub fn issue_token(
    secret: &[u8],
    user_id: &str,
    name: Option<String>,
    email: Option<String>,
    ttl_seconds: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        name,
        email,
        iat: now,
        exp: now + ttl_seconds,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}
