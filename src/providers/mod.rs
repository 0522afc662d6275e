//! Provider adapters.
//!
//! Each variant implements a fixed capability contract over one identity
//! provider: flow detection, redirect construction, token extraction and
//! exchange, and identity normalization. Adapters are looked up by name in
//! a registry; there is no inheritance between them.

pub mod aad;
pub mod facebook;
pub mod google;
pub mod microsoft_account;
pub mod twitter;

pub use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, ProviderSettings};
use crate::error::{AuthError, AuthResult, ProviderName};
use crate::services::{CertCache, TokenValidator};

/// Query parameters a login GET may carry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginQuery {
    /// Authorization code echoed by the provider on continuation.
    pub code: Option<String>,
    /// OAuth state echoed by providers that support it.
    pub state: Option<String>,
    /// Provider error code on a failed consent.
    pub error: Option<String>,
    pub error_description: Option<String>,
    /// Token-bearing continuation markers (provider specific).
    pub id_token: Option<String>,
    pub access_token: Option<String>,
    /// Single-sign-on final redirect target for platform flows.
    pub sso_end_uri: Option<String>,
    /// Popup completion delivery: `postMessage` or `iframe`.
    pub completion_type: Option<String>,
    /// Opener origin the completion result is delivered to.
    pub completion_origin: Option<String>,
}

/// Raw token material obtained from a provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderToken {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// Provider-agnostic result of federating one identity.
#[derive(Debug, Clone)]
pub struct AuthorizationDetails {
    pub provider: ProviderName,
    /// The user's identifier at the provider.
    pub provider_id: String,
    /// Non-secret, user-facing claims.
    pub claims: HashMap<String, serde_json::Value>,
    /// Secret material (provider tokens); encrypted at rest if persisted.
    pub secrets: HashMap<String, serde_json::Value>,
}

/// Options for identity extraction.
#[derive(Debug, Clone, Default)]
pub struct ExchangeOptions {
    /// Fetch profile claims (enabled together with identity persistence).
    /// A failed profile fetch is logged and ignored, never fatal.
    pub fetch_profile: bool,
    /// Nonce expected in the provider token's claims, for providers that
    /// embed replay protection there instead of the query string.
    pub expected_nonce: Option<String>,
}

/// Capability contract each provider variant implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider this adapter serves.
    fn name(&self) -> ProviderName;

    /// Configured credentials and options.
    fn settings(&self) -> &ProviderSettings;

    /// Whether the provider echoes an opaque `state` parameter on return.
    ///
    /// Providers that do not echo state rely on the nonce embedded in their
    /// token claims; a provider with neither has no replay protection on the
    /// redirect step.
    fn echoes_state(&self) -> bool {
        true
    }

    /// Whether a nonce should be minted and checked in the returned token.
    fn uses_nonce(&self) -> bool {
        false
    }

    /// True unless the request carries a continuation marker.
    fn is_new_flow(&self, query: &LoginQuery) -> bool {
        query.code.is_none()
            && query.error.is_none()
            && query.id_token.is_none()
            && query.access_token.is_none()
    }

    /// Build the provider authorization URL for a redirect response.
    fn authorization_redirect(
        &self,
        return_uri: &str,
        state: Option<&str>,
        nonce: Option<&str>,
    ) -> AuthResult<String>;

    /// Extract the provider token from a client-flow request body.
    fn extract_client_token(&self, body: &serde_json::Value) -> AuthResult<ProviderToken>;

    /// Exchange the continuation code for a provider token.
    async fn exchange_server_code(
        &self,
        query: &LoginQuery,
        return_uri: &str,
    ) -> AuthResult<ProviderToken>;

    /// Validate the provider token and normalize the identity.
    async fn to_authorization_details(
        &self,
        token: &ProviderToken,
        options: &ExchangeOptions,
    ) -> AuthResult<AuthorizationDetails>;
}

/// Fail with `ConfigurationError` when a provider is disabled or missing
/// credentials.
pub(crate) fn ensure_enabled(name: ProviderName, settings: &ProviderSettings) -> AuthResult<()> {
    if !settings.enabled {
        return Err(AuthError::ConfigurationError {
            provider: name,
            message: "provider is disabled".to_string(),
        });
    }
    if settings.client_id.is_empty() || settings.client_secret.is_empty() {
        return Err(AuthError::ConfigurationError {
            provider: name,
            message: "provider credentials are missing".to_string(),
        });
    }
    Ok(())
}

/// Read a required string field from a client-flow JSON body.
pub(crate) fn required_body_field<'a>(
    body: &'a serde_json::Value,
    field: &str,
) -> AuthResult<&'a str> {
    body.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::BadInput {
            reason: format!("request body is missing '{field}'"),
        })
}

/// Lookup table of provider adapters, keyed by provider name.
pub struct ProviderRegistry {
    adapters: HashMap<ProviderName, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Build all adapters from configuration.
    ///
    /// A shared HTTP client with a bounded timeout is injected into every
    /// adapter; key-verifying providers each get their own certificate cache.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let validator = TokenValidator::new();
        let min_refresh = Duration::from_secs(config.min_refresh_interval_minutes * 60);

        let mut adapters: HashMap<ProviderName, Arc<dyn ProviderAdapter>> = HashMap::new();

        let google_cache = CertCache::new(
            ProviderName::Google,
            google::keys_uri().to_string(),
            min_refresh,
            http_client.clone(),
        );
        adapters.insert(
            ProviderName::Google,
            Arc::new(google::GoogleAdapter::new(
                config.provider(ProviderName::Google),
                http_client.clone(),
                google_cache,
                validator.clone(),
            )),
        );

        let aad_cache = CertCache::new(
            ProviderName::Aad,
            aad::keys_uri(config.domain_suffix.as_deref()),
            min_refresh,
            http_client.clone(),
        );
        adapters.insert(
            ProviderName::Aad,
            Arc::new(aad::AadAdapter::new(
                config.provider(ProviderName::Aad),
                config.domain_suffix.clone(),
                http_client.clone(),
                aad_cache,
                validator,
            )),
        );

        adapters.insert(
            ProviderName::Facebook,
            Arc::new(facebook::FacebookAdapter::new(
                config.provider(ProviderName::Facebook),
                http_client.clone(),
            )),
        );
        adapters.insert(
            ProviderName::Twitter,
            Arc::new(twitter::TwitterAdapter::new(
                config.provider(ProviderName::Twitter),
                http_client.clone(),
            )),
        );
        adapters.insert(
            ProviderName::MicrosoftAccount,
            Arc::new(microsoft_account::MicrosoftAccountAdapter::new(
                config.provider(ProviderName::MicrosoftAccount),
                http_client,
            )),
        );

        Self { adapters }
    }

    /// Resolve an adapter by provider name.
    #[must_use]
    pub fn get(&self, name: ProviderName) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&name).cloned()
    }

    /// Replace the adapter registered for a provider.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name(), adapter);
    }

    /// Names of providers that are enabled in configuration.
    #[must_use]
    pub fn enabled_providers(&self) -> Vec<ProviderName> {
        let mut names: Vec<ProviderName> = self
            .adapters
            .values()
            .filter(|a| a.settings().enabled)
            .map(|a| a.name())
            .collect();
        names.sort_by_key(|n| n.to_string());
        names
    }
}

// Re-export adapters
pub use aad::AadAdapter;
pub use facebook::FacebookAdapter;
pub use google::GoogleAdapter;
pub use microsoft_account::MicrosoftAccountAdapter;
pub use twitter::TwitterAdapter;
