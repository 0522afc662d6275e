//! Google provider adapter.
//!
//! Google issues an OpenID Connect ID token. Identity comes from validating
//! that token against Google's published signing keys; the profile endpoint
//! is only consulted for supplementary claims.

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

const AUTHORIZE_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URI: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const KEYS_URI: &str = "https://www.googleapis.com/oauth2/v3/certs";

const DEFAULT_SCOPE: &str = "openid email profile";

/// Where Google publishes its token signing keys.
pub fn keys_uri() -> &'static str {
    KEYS_URI
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

pub struct GoogleAdapter {
    settings: ProviderSettings,
    http_client: reqwest::Client,
    cert_cache: CertCache,
    validator: TokenValidator,
    token_uri: String,
}

impl GoogleAdapter {
    pub fn new(
        settings: ProviderSettings,
        http_client: reqwest::Client,
        cert_cache: CertCache,
        validator: TokenValidator,
    ) -> Self {
        Self {
            settings,
            http_client,
            cert_cache,
            validator,
            token_uri: TOKEN_URI.to_string(),
        }
    }

    /// Override the token endpoint.
    #[must_use]
    pub fn with_token_uri(mut self, uri: &str) -> Self {
        self.token_uri = uri.to_string();
        self
    }

    fn validation_params(&self) -> ValidationParams {
        ValidationParams {
            issuers: vec![
                "https://accounts.google.com".to_string(),
                "accounts.google.com".to_string(),
            ],
            audience: self.settings.client_id.clone(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Google
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn authorization_redirect(
        &self,
        return_uri: &str,
        state: Option<&str>,
        _nonce: Option<&str>,
    ) -> AuthResult<String> {
        ensure_enabled(self.name(), &self.settings)?;
        let scope = self.settings.scope.as_deref().unwrap_or(DEFAULT_SCOPE);
        let mut url = format!(
            "{AUTHORIZE_URI}?client_id={}&redirect_uri={}&response_type=code&scope={}",
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(return_uri),
            urlencoding::encode(scope),
        );
        if let Some(state) = state {
            url.push_str(&format!("&state={}", urlencoding::encode(state)));
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

        let response = self
            .http_client
            .post(&self.token_uri)
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
            warn!(%status, "Google token exchange failed");
            debug!(body = %body, "Google token endpoint error body");
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

        let mut user_claims: HashMap<String, serde_json::Value> = HashMap::new();
        if let Some(email) = &claims.email {
            user_claims.insert("email".to_string(), serde_json::json!(email));
        }
        if let Some(name) = &claims.name {
            user_claims.insert("name".to_string(), serde_json::json!(name));
        }

        // Profile claims are supplementary; token validation already
        // established the identity.
        if options.fetch_profile {
            if let Some(access_token) = token.access_token.as_deref() {
                match self.fetch_profile(access_token).await {
                    Ok(profile) => {
                        if let Some(name) = profile.name {
                            user_claims.insert("name".to_string(), serde_json::json!(name));
                        }
                        if let Some(email) = profile.email {
                            user_claims.insert("email".to_string(), serde_json::json!(email));
                        }
                        if let Some(picture) = profile.picture {
                            user_claims.insert("picture".to_string(), serde_json::json!(picture));
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Google profile fetch failed, continuing without profile claims");
                    }
                }
            }
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

impl GoogleAdapter {
    async fn fetch_profile(&self, access_token: &str) -> AuthResult<UserInfo> {
        let response = self
            .http_client
            .get(USERINFO_URI)
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AuthError::ProviderError {
                provider: self.name(),
                reason: format!("userinfo returned {}", response.status()),
            });
        }
        Ok(response.json().await?)
    }
}
