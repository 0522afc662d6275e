//! Service token issuance from normalized authorization details.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::error::AuthResult;
use crate::providers::AuthorizationDetails;

/// Service token lifetime: 30 days.
pub const TOKEN_LIFETIME_DAYS: i64 = 30;

/// Claim-set version.
pub const TOKEN_VERSION: u32 = 2;

/// Issuer claim value.
pub const TOKEN_ISSUER: &str = "urn:fedauth";

/// Claims of the service-issued identity token.
///
/// When user-identity persistence is disabled there is no `id` to look up,
/// so the provider claims and secrets ride along in the token itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTokenClaims {
    pub exp: i64,
    pub iss: String,
    pub ver: u32,
    /// Provider name the identity was federated from.
    pub aud: String,
    /// Stable user identifier: `providerName:providerId`.
    pub uid: String,
    /// Persisted user record ID, when identity persistence is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<HashMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<HashMap<String, serde_json::Value>>,
}

/// An issued token together with the user identifier it names.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub user_id: String,
    pub token: String,
}

/// Builds and signs the service's own identity token.
#[derive(Clone)]
pub struct TokenIssuer {
    signing_key: Vec<u8>,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(master_key: &str) -> Self {
        Self {
            signing_key: master_key.as_bytes().to_vec(),
        }
    }

    /// Issue a token as of now.
    pub fn issue(
        &self,
        details: &AuthorizationDetails,
        stored_user_id: Option<String>,
    ) -> AuthResult<IssuedToken> {
        self.issue_at(details, stored_user_id, Utc::now())
    }

    /// Issue a token with an explicit issuance time.
    ///
    /// Identical details and issuance time produce identical claim sets.
    pub fn issue_at(
        &self,
        details: &AuthorizationDetails,
        stored_user_id: Option<String>,
        issued_at: DateTime<Utc>,
    ) -> AuthResult<IssuedToken> {
        let uid = format!("{}:{}", details.provider, details.provider_id);
        let exp = (issued_at + Duration::days(TOKEN_LIFETIME_DAYS)).timestamp();

        // Without a persisted identity, claims and secrets travel in the token.
        let (claims, secrets) = if stored_user_id.is_some() {
            (None, None)
        } else {
            (
                (!details.claims.is_empty()).then(|| details.claims.clone()),
                (!details.secrets.is_empty()).then(|| details.secrets.clone()),
            )
        };

        let claim_set = ServiceTokenClaims {
            exp,
            iss: TOKEN_ISSUER.to_string(),
            ver: TOKEN_VERSION,
            aud: details.provider.to_string(),
            uid: uid.clone(),
            id: stored_user_id,
            claims,
            secrets,
        };

        let token = encode(
            &Header::default(),
            &claim_set,
            &EncodingKey::from_secret(&self.signing_key),
        )?;

        info!(provider = %details.provider, uid = %uid, "Issued service token");
        Ok(IssuedToken {
            user_id: uid,
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderName;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    fn details() -> AuthorizationDetails {
        let mut claims = HashMap::new();
        claims.insert("name".to_string(), serde_json::json!("Ada Lovelace"));
        let mut secrets = HashMap::new();
        secrets.insert("accessToken".to_string(), serde_json::json!("abc"));
        AuthorizationDetails {
            provider: ProviderName::Google,
            provider_id: "108123".to_string(),
            claims,
            secrets,
        }
    }

    fn decode_claims(token: &str) -> ServiceTokenClaims {
        let mut validation = Validation::default();
        validation.set_audience(&["google"]);
        decode::<ServiceTokenClaims>(
            token,
            &DecodingKey::from_secret(b"test-master-key"),
            &validation,
        )
        .unwrap()
        .claims
    }

    #[test]
    fn token_carries_uid_and_thirty_day_expiry() {
        let issuer = TokenIssuer::new("test-master-key");
        let now = Utc::now();
        let issued = issuer.issue_at(&details(), None, now).unwrap();

        assert_eq!(issued.user_id, "google:108123");
        let claims = decode_claims(&issued.token);
        assert_eq!(claims.uid, "google:108123");
        assert_eq!(claims.aud, "google");
        assert_eq!(claims.iss, TOKEN_ISSUER);
        assert_eq!(claims.ver, TOKEN_VERSION);
        assert_eq!(claims.exp, (now + Duration::days(30)).timestamp());
    }

    #[test]
    fn embeds_claims_without_persisted_identity() {
        let issuer = TokenIssuer::new("test-master-key");
        let claims = decode_claims(&issuer.issue(&details(), None).unwrap().token);
        assert!(claims.id.is_none());
        assert_eq!(
            claims.claims.unwrap().get("name").unwrap(),
            &serde_json::json!("Ada Lovelace")
        );
        assert!(claims.secrets.unwrap().contains_key("accessToken"));
    }

    #[test]
    fn references_persisted_identity_by_id() {
        let issuer = TokenIssuer::new("test-master-key");
        let claims = decode_claims(
            &issuer
                .issue(&details(), Some("user-42".to_string()))
                .unwrap()
                .token,
        );
        assert_eq!(claims.id.as_deref(), Some("user-42"));
        assert!(claims.claims.is_none());
        assert!(claims.secrets.is_none());
    }

    #[test]
    fn issuance_is_deterministic_for_fixed_time() {
        let issuer = TokenIssuer::new("test-master-key");
        let at = Utc::now();
        let a = issuer.issue_at(&details(), None, at).unwrap();
        let b = issuer.issue_at(&details(), None, at).unwrap();
        assert_eq!(a.token, b.token);
        assert_eq!(a.user_id, b.user_id);
    }
}
