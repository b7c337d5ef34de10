//! Bearer token verification

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

const BEARER_PREFIX: &str = "Bearer ";

/// Why a request failed authentication
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization` header, or one without the `Bearer ` prefix
    #[error("Missing or invalid Authorization header")]
    Missing,

    /// Token present but bad signature, malformed or expired
    #[error("Invalid or expired token")]
    Invalid,
}

/// Verified token payload. Registered claims are optional; anything else is
/// kept as-is in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Checks HMAC-signed bearer tokens against a shared secret
#[derive(Clone)]
pub struct CredentialVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl CredentialVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // Time claims are checked against the injected clock in `verify`
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify the raw `Authorization` header value at `now` (Unix seconds).
    ///
    /// Only the first space-separated segment after `Bearer ` is the token.
    pub fn verify(&self, header: Option<&str>, now: i64) -> Result<Claims, AuthError> {
        let credentials = header
            .and_then(|value| value.strip_prefix(BEARER_PREFIX))
            .ok_or(AuthError::Missing)?;

        let token = credentials.split(' ').next().unwrap_or_default();
        if token.is_empty() {
            return Err(AuthError::Invalid);
        }

        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|_| AuthError::Invalid)?
            .claims;

        if claims.exp.map_or(false, |exp| exp <= now) {
            return Err(AuthError::Invalid);
        }
        if claims.nbf.map_or(false, |nbf| nbf > now) {
            return Err(AuthError::Invalid);
        }

        Ok(claims)
    }
}

impl fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";
    const NOW: i64 = 1_700_000_000;

    fn token(secret: &str, algorithm: Algorithm, claims: Value) -> String {
        encode(
            &Header::new(algorithm),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {}", token)
    }

    #[test]
    fn test_valid_token() {
        let verifier = CredentialVerifier::new(SECRET);
        let t = token(SECRET, Algorithm::HS256, json!({ "sub": "alice", "exp": NOW + 60, "role": "ops" }));

        let claims = verifier.verify(Some(&bearer(&t)), NOW).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("alice"));
        assert_eq!(claims.extra.get("role"), Some(&json!("ops")));
    }

    #[test]
    fn test_token_without_time_claims() {
        let verifier = CredentialVerifier::new(SECRET);
        let t = token(SECRET, Algorithm::HS512, json!({ "sub": "svc" }));
        assert!(verifier.verify(Some(&bearer(&t)), NOW).is_ok());
    }

    #[test]
    fn test_missing_header() {
        let verifier = CredentialVerifier::new(SECRET);
        assert_eq!(verifier.verify(None, NOW), Err(AuthError::Missing));
        assert_eq!(verifier.verify(Some("Basic abc"), NOW), Err(AuthError::Missing));
        // Prefix is case-sensitive
        assert_eq!(verifier.verify(Some("bearer abc"), NOW), Err(AuthError::Missing));
        assert_eq!(verifier.verify(Some("Bearer"), NOW), Err(AuthError::Missing));
    }

    #[test]
    fn test_empty_token_is_invalid() {
        let verifier = CredentialVerifier::new(SECRET);
        assert_eq!(verifier.verify(Some("Bearer "), NOW), Err(AuthError::Invalid));
        assert_eq!(verifier.verify(Some("Bearer  trailing"), NOW), Err(AuthError::Invalid));
    }

    #[test]
    fn test_only_first_segment_is_used() {
        let verifier = CredentialVerifier::new(SECRET);
        let t = token(SECRET, Algorithm::HS256, json!({ "sub": "alice" }));
        let header = format!("Bearer {} ignored-suffix", t);
        assert!(verifier.verify(Some(&header), NOW).is_ok());
    }

    #[test]
    fn test_wrong_secret_and_garbage() {
        let verifier = CredentialVerifier::new(SECRET);
        let t = token("other-secret", Algorithm::HS256, json!({ "sub": "mallory" }));
        assert_eq!(verifier.verify(Some(&bearer(&t)), NOW), Err(AuthError::Invalid));
        assert_eq!(verifier.verify(Some("Bearer not.a.jwt"), NOW), Err(AuthError::Invalid));
    }

    #[test]
    fn test_expiry_boundary() {
        let verifier = CredentialVerifier::new(SECRET);
        let t = token(SECRET, Algorithm::HS256, json!({ "exp": NOW }));
        assert_eq!(verifier.verify(Some(&bearer(&t)), NOW), Err(AuthError::Invalid));
        assert!(verifier.verify(Some(&bearer(&t)), NOW - 1).is_ok());
    }

    #[test]
    fn test_not_before() {
        let verifier = CredentialVerifier::new(SECRET);
        let t = token(SECRET, Algorithm::HS256, json!({ "nbf": NOW + 10 }));
        assert_eq!(verifier.verify(Some(&bearer(&t)), NOW), Err(AuthError::Invalid));
        assert!(verifier.verify(Some(&bearer(&t)), NOW + 10).is_ok());
    }
}
