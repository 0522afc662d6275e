//! Certificate cache: fetches and caches a provider's public signing keys.
//!
//! One instance exists per provider that verifies JWTs (Google, AAD). A
//! forced refresh is floored at `min_refresh_interval` so a malicious or
//! buggy client cannot drive unbounded traffic against the provider's key
//! endpoint. A failed fetch leaves the previous cache intact.

use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, AuthResult, ProviderName};

/// Maximum key-document response size (512 KB).
const MAX_KEYS_RESPONSE_SIZE: usize = 512 * 1024;

/// Individual JWK from a provider key endpoint (RFC 7517).
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderKey {
    /// Key ID.
    pub kid: Option<String>,
    /// X.509 certificate SHA-1 thumbprint (AAD references keys by this).
    #[serde(rename = "x5t")]
    pub x5t: Option<String>,
    /// Key type ("RSA").
    pub kty: String,
    /// Declared algorithm.
    pub alg: Option<String>,
    /// RSA modulus (base64url).
    pub n: Option<String>,
    /// RSA exponent (base64url).
    pub e: Option<String>,
    /// X.509 certificate chain (base64 DER), when published.
    #[serde(default, rename = "x5c")]
    pub certificates: Vec<String>,
}

impl ProviderKey {
    /// Whether this key is selected by the given key identifier (kid or x5t).
    #[must_use]
    pub fn matches(&self, key_id: &str) -> bool {
        self.kid.as_deref() == Some(key_id) || self.x5t.as_deref() == Some(key_id)
    }
}

/// Provider key set as fetched from the key endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct KeySet {
    pub keys: Vec<ProviderKey>,
}

impl KeySet {
    /// Find a key by kid or x5t.
    #[must_use]
    pub fn find(&self, key_id: &str) -> Option<&ProviderKey> {
        self.keys.iter().find(|k| k.matches(key_id))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    keys: KeySet,
    last_refresh: Instant,
}

/// Per-provider certificate cache with a bounded-staleness refresh contract.
#[derive(Clone)]
pub struct CertCache {
    provider: ProviderName,
    keys_uri: String,
    min_refresh_interval: Duration,
    http_client: reqwest::Client,
    entry: Arc<RwLock<Option<CacheEntry>>>,
}

impl CertCache {
    /// Create a cache for one provider's key endpoint.
    #[must_use]
    pub fn new(
        provider: ProviderName,
        keys_uri: String,
        min_refresh_interval: Duration,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            provider,
            keys_uri,
            min_refresh_interval,
            http_client,
            entry: Arc::new(RwLock::new(None)),
        }
    }

    /// Return the cached key set, fetching when the cache is empty or when a
    /// forced refresh is requested and the refresh floor has elapsed.
    ///
    /// Concurrent refreshes are tolerated rather than serialized: a refresh
    /// is a pure read-and-replace of provider-published public data, so the
    /// last writer wins.
    #[instrument(skip(self), fields(provider = %self.provider))]
    pub async fn get(&self, force_refresh: bool) -> AuthResult<KeySet> {
        {
            let guard = self.entry.read().await;
            if let Some(entry) = guard.as_ref() {
                let refresh_allowed =
                    entry.last_refresh.elapsed() >= self.min_refresh_interval;
                if !force_refresh || !refresh_allowed {
                    if force_refresh {
                        debug!(
                            provider = %self.provider,
                            "Forced refresh suppressed by refresh-interval floor"
                        );
                    }
                    return Ok(entry.keys.clone());
                }
            }
        }

        let keys = self.fetch_keys().await?;
        let mut guard = self.entry.write().await;
        *guard = Some(CacheEntry {
            keys: keys.clone(),
            last_refresh: Instant::now(),
        });
        info!(
            provider = %self.provider,
            key_count = keys.keys.len(),
            "Provider signing keys cached"
        );
        Ok(keys)
    }

    /// Fetch the key document from the provider with a size limit.
    async fn fetch_keys(&self) -> AuthResult<KeySet> {
        let response = self
            .http_client
            .get(&self.keys_uri)
            .send()
            .await
            .map_err(|e| AuthError::ProviderError {
                provider: self.provider,
                reason: format!("key fetch failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::ProviderError {
                provider: self.provider,
                reason: format!("key endpoint returned HTTP {status}"),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AuthError::ProviderError {
                provider: self.provider,
                reason: format!("key fetch body error: {e}"),
            })?;
        if bytes.len() > MAX_KEYS_RESPONSE_SIZE {
            return Err(AuthError::ProviderError {
                provider: self.provider,
                reason: format!("key document too large: {} bytes", bytes.len()),
            });
        }

        let keys: KeySet =
            serde_json::from_slice(&bytes).map_err(|e| AuthError::ProviderError {
                provider: self.provider,
                reason: format!("malformed key document: {e}"),
            })?;
        if keys.keys.is_empty() {
            warn!(provider = %self.provider, "Provider returned an empty key set");
        }
        Ok(keys)
    }

    /// The provider this cache serves.
    #[must_use]
    pub fn provider(&self) -> ProviderName {
        self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_matches_by_kid_or_x5t() {
        let key = ProviderKey {
            kid: Some("kid-1".to_string()),
            x5t: Some("thumb-1".to_string()),
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            n: Some("AQAB".to_string()),
            e: Some("AQAB".to_string()),
            certificates: Vec::new(),
        };
        assert!(key.matches("kid-1"));
        assert!(key.matches("thumb-1"));
        assert!(!key.matches("kid-2"));
    }

    #[test]
    fn keyset_deserializes_standard_jwks() {
        let json = r#"{
            "keys": [
                {"kty": "RSA", "kid": "a", "n": "AQAB", "e": "AQAB"},
                {"kty": "RSA", "x5t": "b", "n": "AQAB", "e": "AQAB", "x5c": ["MIIB"]}
            ]
        }"#;
        let set: KeySet = serde_json::from_str(json).unwrap();
        assert_eq!(set.keys.len(), 2);
        assert!(set.find("a").is_some());
        assert!(set.find("b").is_some());
        assert_eq!(set.find("b").unwrap().certificates.len(), 1);
        assert!(set.find("c").is_none());
    }
}
