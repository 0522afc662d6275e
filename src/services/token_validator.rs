//! Provider JWT validation with key-rotation tolerance.
//!
//! Validation runs against the current certificate cache. When the token's
//! key identifier is absent from the cached key set (as opposed to a
//! signature, expiry, or structure failure) the cache is force-refreshed
//! once and validation retried once. The retry is a two-iteration loop with
//! an explicit flag, bounding work regardless of how many keys rotate.

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, instrument};

use crate::error::{AuthError, AuthResult};
use crate::services::cert_cache::{CertCache, ProviderKey};

/// Clock-skew leeway for expiry validation (60 seconds).
const LEEWAY_SECS: u64 = 60;

/// Claims extracted from a validated provider ID token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: StringOrArray,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

/// Handles `aud` being either a single string or an array of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrArray {
    Single(String),
    Multiple(Vec<String>),
}

impl StringOrArray {
    /// Check if the audience contains a specific value.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        match self {
            StringOrArray::Single(s) => s == value,
            StringOrArray::Multiple(v) => v.iter().any(|s| s == value),
        }
    }
}

/// Expected issuer/audience for one provider's tokens.
#[derive(Debug, Clone)]
pub struct ValidationParams {
    /// Accepted `iss` values (AAD varies by tenant, Google by endpoint era).
    pub issuers: Vec<String>,
    /// Expected `aud` value, normally the provider client ID.
    pub audience: String,
}

/// Validates provider JWTs against a [`CertCache`].
#[derive(Clone, Default)]
pub struct TokenValidator;

impl TokenValidator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate a raw provider token, refreshing the cache at most once when
    /// the token's key identifier is missing from the cached set.
    #[instrument(skip(self, cache, token, params), fields(provider = %cache.provider()))]
    pub async fn validate(
        &self,
        cache: &CertCache,
        token: &str,
        params: &ValidationParams,
    ) -> AuthResult<IdTokenClaims> {
        let header = decode_header(token).map_err(|e| AuthError::TokenValidation {
            reason: format!("failed to decode token header: {e}"),
        })?;
        let key_id = header
            .kid
            .or(header.x5t)
            .ok_or_else(|| AuthError::TokenValidation {
                reason: "token header carries neither kid nor x5t".to_string(),
            })?;

        let mut retried = false;
        loop {
            let keys = cache.get(retried).await?;
            match keys.find(&key_id) {
                Some(key) => return self.validate_with_key(token, key, params),
                None if !retried => {
                    info!(
                        key_id = %key_id,
                        provider = %cache.provider(),
                        "Key identifier not in cached set, refreshing for key rotation"
                    );
                    retried = true;
                }
                None => {
                    return Err(AuthError::TokenValidation {
                        reason: format!(
                            "no key matching '{key_id}' found, even after refresh"
                        ),
                    })
                }
            }
        }
    }

    /// Validate signature and standard claims against one key.
    fn validate_with_key(
        &self,
        token: &str,
        key: &ProviderKey,
        params: &ValidationParams,
    ) -> AuthResult<IdTokenClaims> {
        let (decoding_key, algorithm) = build_decoding_key(key)?;

        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[&params.audience]);
        // An empty issuer list skips the check; adapters with tenant-scoped
        // issuers (AAD) verify `iss` themselves after decoding.
        if !params.issuers.is_empty() {
            validation.set_issuer(&params.issuers);
        }
        validation.leeway = LEEWAY_SECS;

        let data = decode::<IdTokenClaims>(token, &decoding_key, &validation).map_err(|e| {
            AuthError::TokenValidation {
                reason: format!("signature or claims validation failed: {e}"),
            }
        })?;
        Ok(data.claims)
    }
}

/// Build a decoding key and algorithm from a provider key.
///
/// Algorithm is taken from the JWK's `alg` field, never the token header,
/// which prevents algorithm confusion.
fn build_decoding_key(key: &ProviderKey) -> AuthResult<(DecodingKey, Algorithm)> {
    if key.kty != "RSA" {
        return Err(AuthError::TokenValidation {
            reason: format!("unsupported key type: {}", key.kty),
        });
    }
    let n = key.n.as_ref().ok_or_else(|| AuthError::TokenValidation {
        reason: "RSA key missing 'n' component".to_string(),
    })?;
    let e = key.e.as_ref().ok_or_else(|| AuthError::TokenValidation {
        reason: "RSA key missing 'e' component".to_string(),
    })?;
    let decoding_key =
        DecodingKey::from_rsa_components(n, e).map_err(|e| AuthError::TokenValidation {
            reason: format!("failed to build RSA decoding key: {e}"),
        })?;
    let algorithm = match key.alg.as_deref() {
        Some("RS384") => Algorithm::RS384,
        Some("RS512") => Algorithm::RS512,
        _ => Algorithm::RS256,
    };
    Ok((decoding_key, algorithm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_or_array_single() {
        let s: StringOrArray = serde_json::from_str(r#""client-id""#).unwrap();
        assert!(s.contains("client-id"));
        assert!(!s.contains("other"));
    }

    #[test]
    fn string_or_array_multiple() {
        let s: StringOrArray = serde_json::from_str(r#"["client-id", "second"]"#).unwrap();
        assert!(s.contains("client-id"));
        assert!(s.contains("second"));
        assert!(!s.contains("absent"));
    }

    #[test]
    fn claims_deserialize_with_extras() {
        let json = r#"{
            "sub": "12345",
            "iss": "https://accounts.google.com",
            "aud": "client-id",
            "exp": 1700000000,
            "iat": 1699999000,
            "email": "user@example.com",
            "hd": "example.com"
        }"#;
        let claims: IdTokenClaims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.sub, "12345");
        assert!(claims.aud.contains("client-id"));
        assert_eq!(
            claims.additional.get("hd").and_then(|v| v.as_str()),
            Some("example.com")
        );
    }

    #[test]
    fn non_rsa_key_rejected() {
        let key = ProviderKey {
            kid: Some("k".to_string()),
            x5t: None,
            kty: "EC".to_string(),
            alg: None,
            n: None,
            e: None,
            certificates: Vec::new(),
        };
        assert!(build_decoding_key(&key).is_err());
    }
}
