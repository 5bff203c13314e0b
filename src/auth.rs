use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::error::TokenError;
use crate::models::AuthPayload;

/// bcrypt only looks at the first 72 bytes; truncate explicitly (on a char
/// boundary) so longer secrets behave the same on hash and verify.
const BCRYPT_MAX_BYTES: usize = 72;

fn truncate_secret(secret: &str) -> &str {
    if secret.len() <= BCRYPT_MAX_BYTES {
        return secret;
    }
    let mut end = BCRYPT_MAX_BYTES;
    while !secret.is_char_boundary(end) {
        end -= 1;
    }
    &secret[..end]
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(truncate_secret(password), cost)
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    verify(truncate_secret(password), hash).unwrap_or(false)
}

/// Issues and validates HS256 identity tokens. Holds no per-token state.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl_minutes: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn create_jwt(&self, name: &str) -> Result<String, TokenError> {
        self.create_jwt_with_ttl(name, self.ttl)
    }

    /// Negative `ttl` yields an already-expired token.
    pub fn create_jwt_with_ttl(&self, name: &str, ttl: Duration) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = AuthPayload {
            sub: name.to_owned(),
            exp: (now + ttl).timestamp().max(0) as usize,
            iat: now.timestamp().max(0) as usize,
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| TokenError::Signing)
    }

    pub fn validate_jwt(&self, token: &str) -> Result<AuthPayload, TokenError> {
        decode::<AuthPayload>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let hashed = hash_password("student123", 4).unwrap();
        assert!(verify_password("student123", &hashed));
        assert!(!verify_password("wrong", &hashed));
        assert!(!verify_password("student123", "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_long_secret_truncated_consistently() {
        let long = "é".repeat(60);
        let hashed = hash_password(&long, 4).unwrap();
        assert!(verify_password(&long, &hashed));
        assert!(truncate_secret(&long).len() <= BCRYPT_MAX_BYTES);
    }

    #[test]
    fn test_token_roundtrip() {
        let issuer = TokenIssuer::new(b"unit-test-secret", 30);
        let token = issuer.create_jwt("lecturer1").unwrap();
        let claims = issuer.validate_jwt(&token).unwrap();
        assert_eq!(claims.sub, "lecturer1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_expired_token_distinguished_from_invalid() {
        let issuer = TokenIssuer::new(b"unit-test-secret", 30);
        let expired = issuer.create_jwt_with_ttl("student1", Duration::minutes(-5)).unwrap();
        assert_eq!(issuer.validate_jwt(&expired).unwrap_err(), TokenError::Expired);
        assert_eq!(issuer.validate_jwt("garbage.token.value").unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let ours = TokenIssuer::new(b"ours", 30);
        let theirs = TokenIssuer::new(b"theirs", 30);
        let token = theirs.create_jwt("admin").unwrap();
        assert_eq!(ours.validate_jwt(&token).unwrap_err(), TokenError::Invalid);
    }
}
