//! Facebook provider adapter.
//!
//! Facebook hands back an opaque access token rather than a verifiable JWT,
//! so the Graph `me` call doubles as token validation: if it fails, the
//! login fails.

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

const AUTHORIZE_URI: &str = "https://www.facebook.com/v12.0/dialog/oauth";
const TOKEN_URI: &str = "https://graph.facebook.com/v12.0/oauth/access_token";
const ME_URI: &str = "https://graph.facebook.com/me";

const DEFAULT_SCOPE: &str = "email";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

pub struct FacebookAdapter {
    settings: ProviderSettings,
    http_client: reqwest::Client,
}

impl FacebookAdapter {
    pub fn new(settings: ProviderSettings, http_client: reqwest::Client) -> Self {
        Self {
            settings,
            http_client,
        }
    }
}

#[async_trait]
impl ProviderAdapter for FacebookAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Facebook
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
        // `display=popup` renders the consent dialog without site chrome.
        if let Some(display) = self.settings.display.as_deref() {
            url.push_str(&format!("&display={}", urlencoding::encode(display)));
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
            .get(TOKEN_URI)
            .query(&[
                ("code", code),
                ("client_id", &self.settings.client_id),
                ("client_secret", &self.settings.client_secret),
                ("redirect_uri", return_uri),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Facebook token exchange failed");
            debug!(body = %body, "Facebook token endpoint error body");
            return Err(AuthError::ProviderError {
                provider: self.name(),
                reason: format!("token exchange returned {status}"),
            });
        }

        let token: TokenResponse = response.json().await?;
        Ok(ProviderToken {
            access_token: Some(token.access_token),
            expires_in: token.expires_in,
            ..ProviderToken::default()
        })
    }

    async fn to_authorization_details(
        &self,
        token: &ProviderToken,
        options: &ExchangeOptions,
    ) -> AuthResult<AuthorizationDetails> {
        ensure_enabled(self.name(), &self.settings)?;
        let access_token = token
            .access_token
            .as_deref()
            .ok_or_else(|| AuthError::TokenValidation {
                reason: "provider response carries no access token".to_string(),
            })?;

        let fields = if options.fetch_profile {
            "id,name,email"
        } else {
            "id"
        };
        let response = self
            .http_client
            .get(ME_URI)
            .query(&[("fields", fields), ("access_token", access_token)])
            .send()
            .await?;

        // The graph call is the only token check Facebook offers; a failure
        // here means the token is no good.
        if !response.status().is_success() {
            return Err(AuthError::ProviderError {
                provider: self.name(),
                reason: format!("graph me returned {}", response.status()),
            });
        }

        let me: MeResponse = response.json().await?;

        let mut claims: HashMap<String, serde_json::Value> = HashMap::new();
        if let Some(name) = me.name {
            claims.insert("name".to_string(), serde_json::json!(name));
        }
        if let Some(email) = me.email {
            claims.insert("email".to_string(), serde_json::json!(email));
        }

        let mut secrets: HashMap<String, serde_json::Value> = HashMap::new();
        secrets.insert("accessToken".to_string(), serde_json::json!(access_token));

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
            client_id: "fb-client".to_string(),
            client_secret: "fb-secret".to_string(),
            enabled: true,
            scope: None,
            display: Some("popup".to_string()),
        }
    }

    fn adapter(settings: ProviderSettings) -> FacebookAdapter {
        FacebookAdapter::new(settings, reqwest::Client::new())
    }

    #[test]
    fn redirect_honors_display_option() {
        let url = adapter(settings())
            .authorization_redirect("https://login.example.com/login/facebook", Some("s1"), None)
            .unwrap();
        assert!(url.contains("display=popup"));
        assert!(url.contains("state=s1"));
    }

    #[test]
    fn redirect_fails_without_credentials() {
        let mut s = settings();
        s.client_secret = String::new();
        let err = adapter(s)
            .authorization_redirect("https://login.example.com/login/facebook", None, None)
            .unwrap_err();
        assert!(matches!(err, AuthError::ConfigurationError { .. }));
    }

    #[test]
    fn client_token_requires_access_token() {
        let a = adapter(settings());
        let token = a
            .extract_client_token(&serde_json::json!({"access_token": "fb-at"}))
            .unwrap();
        assert_eq!(token.access_token.as_deref(), Some("fb-at"));

        let err = a.extract_client_token(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, AuthError::BadInput { .. }));
    }
}
