//! Microsoft Account (consumer) provider adapter.
//!
//! Uses the Live Connect endpoints with an opaque access token; identity is
//! established by the `me` profile call, the same way the Facebook adapter
//! works.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::ProviderSettings;
use crate::error::{AuthError, AuthResult, ProviderName};

use super::{
    ensure_enabled, required_body_field, AuthorizationDetails, ExchangeOptions, LoginQuery,
    ProviderAdapter, ProviderToken,
};

const AUTHORIZE_URI: &str = "https://login.live.com/oauth20_authorize.srf";
const TOKEN_URI: &str = "https://login.live.com/oauth20_token.srf";
const ME_URI: &str = "https://apis.live.net/v5.0/me";

const DEFAULT_SCOPE: &str = "wl.basic wl.emails";

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
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    emails: Option<MeEmails>,
}

#[derive(Debug, Deserialize)]
struct MeEmails {
    #[serde(default)]
    preferred: Option<String>,
    #[serde(default)]
    account: Option<String>,
}

pub struct MicrosoftAccountAdapter {
    settings: ProviderSettings,
    http_client: reqwest::Client,
}

impl MicrosoftAccountAdapter {
    pub fn new(settings: ProviderSettings, http_client: reqwest::Client) -> Self {
        Self {
            settings,
            http_client,
        }
    }
}

#[async_trait]
impl ProviderAdapter for MicrosoftAccountAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::MicrosoftAccount
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

        let response = self
            .http_client
            .post(TOKEN_URI)
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
            warn!(%status, "Microsoft Account token exchange failed");
            debug!(body = %body, "Microsoft Account token endpoint error body");
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
            .query(&[("access_token", access_token)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::ProviderError {
                provider: self.name(),
                reason: format!("me returned {}", response.status()),
            });
        }

        let me: MeResponse = response.json().await?;

        let mut claims: HashMap<String, serde_json::Value> = HashMap::new();
        if let Some(name) = me.name {
            claims.insert("name".to_string(), serde_json::json!(name));
        }
        if let Some(emails) = me.emails {
            if let Some(email) = emails.preferred.or(emails.account) {
                claims.insert("email".to_string(), serde_json::json!(email));
            }
        }

        let mut secrets: HashMap<String, serde_json::Value> = HashMap::new();
        secrets.insert("accessToken".to_string(), serde_json::json!(access_token));
        if let Some(refresh_token) = &token.refresh_token {
            secrets.insert("refreshToken".to_string(), serde_json::json!(refresh_token));
        }

        Ok(AuthorizationDetails {
            provider: self.name(),
            provider_id: me.id,
            claims,
            secrets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ProviderSettings {
        ProviderSettings {
            client_id: "msa-client".to_string(),
            client_secret: "msa-secret".to_string(),
            enabled: true,
            scope: None,
            display: None,
        }
    }

    #[test]
    fn redirect_targets_live_login() {
        let a = MicrosoftAccountAdapter::new(settings(), reqwest::Client::new());
        let url = a
            .authorization_redirect(
                "https://login.example.com/login/microsoftaccount",
                Some("s"),
                None,
            )
            .unwrap();
        assert!(url.starts_with(AUTHORIZE_URI));
        assert!(url.contains("scope=wl.basic%20wl.emails"));
    }

    #[test]
    fn client_token_requires_access_token() {
        let a = MicrosoftAccountAdapter::new(settings(), reqwest::Client::new());
        let err = a
            .extract_client_token(&serde_json::json!({"id_token": "x"}))
            .unwrap_err();
        assert!(matches!(err, AuthError::BadInput { .. }));
    }
}
