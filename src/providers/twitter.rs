//! Twitter provider adapter.
//!
//! Twitter's OAuth 2.0 endpoints require PKCE. The flow state token doubles
//! as the plain-method code verifier, so no extra secret has to survive the
//! redirect: the state comes back both in the query string and in the flow
//! cookie, and the cookie copy is what gets replayed to the token endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::config::ProviderSettings;
use crate::error::{AuthError, AuthResult, ProviderName};
use tracing::{debug, warn};

use super::{
    ensure_enabled, required_body_field, AuthorizationDetails, ExchangeOptions, LoginQuery,
    ProviderAdapter, ProviderToken,
};

const AUTHORIZE_URI: &str = "https://twitter.com/i/oauth2/authorize";
const TOKEN_URI: &str = "https://api.twitter.com/2/oauth2/token";
const ME_URI: &str = "https://api.twitter.com/2/users/me";

const DEFAULT_SCOPE: &str = "users.read tweet.read";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    data: MeData,
}

#[derive(Debug, Deserialize)]
struct MeData {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

pub struct TwitterAdapter {
    settings: ProviderSettings,
    http_client: reqwest::Client,
}

impl TwitterAdapter {
    pub fn new(settings: ProviderSettings, http_client: reqwest::Client) -> Self {
        Self {
            settings,
            http_client,
        }
    }
}

#[async_trait]
impl ProviderAdapter for TwitterAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Twitter
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
        let state = state.ok_or_else(|| AuthError::InternalError {
            message: "twitter redirect requires a state token".to_string(),
        })?;
        let scope = self.settings.scope.as_deref().unwrap_or(DEFAULT_SCOPE);
        Ok(format!(
            "{AUTHORIZE_URI}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&code_challenge={}&code_challenge_method=plain",
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(return_uri),
            urlencoding::encode(scope),
            urlencoding::encode(state),
            urlencoding::encode(state),
        ))
    }

    fn extract_client_token(&self, body: &serde_json::Value) -> AuthResult<ProviderToken> {
        let access_token = required_body_field(body, "access_token")?;
        Ok(ProviderToken {
            access_token: Some(access_token.to_string()),
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
        let verifier = query.state.as_deref().ok_or_else(|| AuthError::BadInput {
            reason: "continuation request is missing 'state'".to_string(),
        })?;

        let response = self
            .http_client
            .post(TOKEN_URI)
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(&[
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", return_uri),
                ("code_verifier", verifier),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Twitter token exchange failed");
            debug!(body = %body, "Twitter token endpoint error body");
            return Err(AuthError::ProviderError {
                provider: self.name(),
                reason: format!("token exchange returned {status}"),
            });
        }

        let token: TokenResponse = response.json().await?;
        Ok(ProviderToken {
            access_token: Some(token.access_token),
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
            ..ProviderToken::default()
        })
    }

    async fn to_authorization_details(
        &self,
        token: &ProviderToken,
        _options: &ExchangeOptions,
    ) -> AuthResult<AuthorizationDetails> {
        ensure_enabled(self.name(), &self.settings)?;
        let access_token = token
            .access_token
            .as_deref()
            .ok_or_else(|| AuthError::TokenValidation {
                reason: "provider response carries no access token".to_string(),
            })?;

        let response = self
            .http_client
            .get(ME_URI)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::ProviderError {
                provider: self.name(),
                reason: format!("users/me returned {}", response.status()),
            });
        }

        let me: MeResponse = response.json().await?;

        let mut claims: HashMap<String, serde_json::Value> = HashMap::new();
        if let Some(name) = me.data.name {
            claims.insert("name".to_string(), serde_json::json!(name));
        }
        if let Some(username) = me.data.username {
            claims.insert("username".to_string(), serde_json::json!(username));
        }

        let mut secrets: HashMap<String, serde_json::Value> = HashMap::new();
        secrets.insert("accessToken".to_string(), serde_json::json!(access_token));
        if let Some(refresh_token) = &token.refresh_token {
            secrets.insert("refreshToken".to_string(), serde_json::json!(refresh_token));
        }

        Ok(AuthorizationDetails {
            provider: self.name(),
            provider_id: me.data.id,
            claims,
            secrets,
        })
    }
}
