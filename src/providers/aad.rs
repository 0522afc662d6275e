//! Azure Active Directory provider adapter.
//!
//! AAD issues tenant-scoped ID tokens whose `iss` varies per tenant, so the
//! issuer is checked here by prefix after signature validation rather than
//! by exact match. Replay protection uses a nonce embedded in the token
//! claims instead of the query string.
//!
//! Sovereign clouds are reached by swapping the login domain suffix
//! (`login.microsoftonline.us`, `login.partner.microsoftonline.cn`), driven
//! by configuration.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::ProviderSettings;
use crate::error::{AuthError, AuthResult, ProviderName};
use crate::services::{CertCache, TokenValidator, ValidationParams};

use super::{
    ensure_enabled, required_body_field, AuthorizationDetails, ExchangeOptions, LoginQuery,
    ProviderAdapter, ProviderToken,
};

const DEFAULT_SUFFIX: &str = "com";
const DEFAULT_SCOPE: &str = "openid profile email";

/// Where this cloud's discovery keys live.
pub fn keys_uri(domain_suffix: Option<&str>) -> String {
    format!(
        "https://{}/common/discovery/v2.0/keys",
        login_host(domain_suffix)
    )
}

fn login_host(domain_suffix: Option<&str>) -> String {
    format!(
        "login.microsoftonline.{}",
        domain_suffix.unwrap_or(DEFAULT_SUFFIX)
    )
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct AadAdapter {
    settings: ProviderSettings,
    domain_suffix: Option<String>,
    http_client: reqwest::Client,
    cert_cache: CertCache,
    validator: TokenValidator,
}

impl AadAdapter {
    pub fn new(
        settings: ProviderSettings,
        domain_suffix: Option<String>,
        http_client: reqwest::Client,
        cert_cache: CertCache,
        validator: TokenValidator,
    ) -> Self {
        Self {
            settings,
            domain_suffix,
            http_client,
            cert_cache,
            validator,
        }
    }

    fn host(&self) -> String {
        login_host(self.domain_suffix.as_deref())
    }

    fn validation_params(&self) -> ValidationParams {
        ValidationParams {
            // Issuer is tenant-scoped; verified by prefix below.
            issuers: Vec::new(),
            audience: self.settings.client_id.clone(),
        }
    }

    fn check_issuer(&self, iss: &str) -> AuthResult<()> {
        let v2_prefix = format!("https://{}/", self.host());
        // v1 tokens carry the sts.windows.net issuer in the public cloud.
        if iss.starts_with(&v2_prefix) || iss.starts_with("https://sts.windows.net/") {
            return Ok(());
        }
        Err(AuthError::TokenValidation {
            reason: format!("unexpected token issuer '{iss}'"),
        })
    }
}

#[async_trait]
impl ProviderAdapter for AadAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Aad
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn uses_nonce(&self) -> bool {
        true
    }

    fn authorization_redirect(
        &self,
        return_uri: &str,
        state: Option<&str>,
        nonce: Option<&str>,
    ) -> AuthResult<String> {
        ensure_enabled(self.name(), &self.settings)?;
        let scope = self.settings.scope.as_deref().unwrap_or(DEFAULT_SCOPE);
        let mut url = format!(
            "https://{}/common/oauth2/v2.0/authorize?client_id={}&redirect_uri={}&response_type=code&scope={}",
            self.host(),
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(return_uri),
            urlencoding::encode(scope),
        );
        if let Some(state) = state {
            url.push_str(&format!("&state={}", urlencoding::encode(state)));
        }
        if let Some(nonce) = nonce {
            url.push_str(&format!("&nonce={}", urlencoding::encode(nonce)));
        }
        Ok(url)
    }

    fn extract_client_token(&self, body: &serde_json::Value) -> AuthResult<ProviderToken> {
        let id_token = required_body_field(body, "id_token")?;
        Ok(ProviderToken {
            id_token: Some(id_token.to_string()),
            ..ProviderToken::default()
        })
    }

    async fn exchange_server_code(
        &self,
        query: &LoginQuery,
        return_uri: &str,
    ) -> AuthResult<ProviderToken> {
        let code = query.code.as_deref().ok_or_else(|| AuthError::BadInput {
            reason: "continuation request is missing 'code'".to_string(),
        })?;

        let token_uri = format!("https://{}/common/oauth2/v2.0/token", self.host());
        let response = self
            .http_client
            .post(&token_uri)
            .form(&[
                ("code", code),
                ("client_id", &self.settings.client_id),
                ("client_secret", &self.settings.client_secret),
                ("redirect_uri", return_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "AAD token exchange failed");
            debug!(body = %body, "AAD token endpoint error body");
            return Err(AuthError::ProviderError {
                provider: self.name(),
                reason: format!("token exchange returned {status}"),
            });
        }

        let token: TokenResponse = response.json().await?;
        Ok(ProviderToken {
            access_token: token.access_token,
            id_token: token.id_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }

    async fn to_authorization_details(
        &self,
        token: &ProviderToken,
        options: &ExchangeOptions,
    ) -> AuthResult<AuthorizationDetails> {
        ensure_enabled(self.name(), &self.settings)?;
        let id_token = token
            .id_token
            .as_deref()
            .ok_or_else(|| AuthError::TokenValidation {
                reason: "provider response carries no ID token".to_string(),
            })?;

        let claims = self
            .validator
            .validate(&self.cert_cache, id_token, &self.validation_params())
            .await?;
        self.check_issuer(&claims.iss)?;

        if let Some(expected) = options.expected_nonce.as_deref() {
            match claims.nonce.as_deref() {
                Some(got) if got == expected => {}
                _ => return Err(AuthError::NonceMismatch),
            }
        }

        let mut user_claims: HashMap<String, serde_json::Value> = HashMap::new();
        if let Some(email) = &claims.email {
            user_claims.insert("email".to_string(), serde_json::json!(email));
        }
        if let Some(name) = &claims.name {
            user_claims.insert("name".to_string(), serde_json::json!(name));
        }
        // Tenant identifier is worth keeping alongside the subject.
        if let Some(tid) = claims.additional.get("tid") {
            user_claims.insert("tid".to_string(), tid.clone());
        }

        let mut secrets: HashMap<String, serde_json::Value> = HashMap::new();
        if let Some(access_token) = &token.access_token {
            secrets.insert("accessToken".to_string(), serde_json::json!(access_token));
        }
        if let Some(refresh_token) = &token.refresh_token {
            secrets.insert("refreshToken".to_string(), serde_json::json!(refresh_token));
        }

        Ok(AuthorizationDetails {
            provider: self.name(),
            provider_id: claims.sub,
            claims: user_claims,
            secrets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> ProviderSettings {
        ProviderSettings {
            client_id: "aad-client".to_string(),
            client_secret: "aad-secret".to_string(),
            enabled: true,
            scope: None,
            display: None,
        }
    }

    fn adapter(suffix: Option<&str>) -> AadAdapter {
        let client = reqwest::Client::new();
        let cache = CertCache::new(
            ProviderName::Aad,
            keys_uri(suffix),
            Duration::from_secs(300),
            client.clone(),
        );
        AadAdapter::new(
            settings(),
            suffix.map(str::to_string),
            client,
            cache,
            TokenValidator::new(),
        )
    }

    #[test]
    fn redirect_carries_nonce_for_aad() {
        let url = adapter(None)
            .authorization_redirect(
                "https://login.example.com/login/aad",
                Some("st"),
                Some("n-42"),
            )
            .unwrap();
        assert!(url.starts_with("https://login.microsoftonline.com/common/oauth2/v2.0/authorize"));
        assert!(url.contains("nonce=n-42"));
    }

    #[test]
    fn sovereign_cloud_suffix_changes_login_host() {
        let url = adapter(Some("us"))
            .authorization_redirect("https://login.example.com/login/aad", None, None)
            .unwrap();
        assert!(url.starts_with("https://login.microsoftonline.us/"));
        assert_eq!(
            keys_uri(Some("us")),
            "https://login.microsoftonline.us/common/discovery/v2.0/keys"
        );
    }

    #[test]
    fn issuer_prefix_check() {
        let a = adapter(None);
        assert!(a
            .check_issuer("https://login.microsoftonline.com/tenant-id/v2.0")
            .is_ok());
        assert!(a
            .check_issuer("https://sts.windows.net/tenant-id/")
            .is_ok());
        assert!(a.check_issuer("https://evil.example.com/").is_err());
    }
}
