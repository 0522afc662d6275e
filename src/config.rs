//! Application configuration loaded from environment variables.
//!
//! Fail-fast loading with validation: required variables must be present and
//! valid, or startup stops with a clear error. Provider blocks are optional;
//! a provider without credentials is simply disabled.

use std::collections::HashMap;
use std::env;
use thiserror::Error;

use crate::error::ProviderName;

/// Default floor between forced certificate refreshes, in minutes.
pub const DEFAULT_MIN_REFRESH_INTERVAL_MINUTES: u64 = 5;

/// Insecure default master key, tolerated only outside production.
pub const INSECURE_MASTER_KEY: &str = "development-master-key-change-in-production";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Insecure default for {0} is not allowed in production")]
    InsecureDefault(String),
}

/// Application environment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Production,
}

impl AppEnvironment {
    /// Parse from the `APP_ENV` environment variable value.
    /// Defaults to `Development` if unset or unrecognized.
    #[must_use]
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => {
                tracing::warn!(
                    value = other,
                    "Unrecognized APP_ENV value, defaulting to Development"
                );
                Self::Development
            }
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        *self == Self::Production
    }
}

/// Per-provider credentials and options.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// OAuth client/application ID at the provider.
    pub client_id: String,
    /// OAuth client secret at the provider.
    pub client_secret: String,
    /// Whether logins through this provider are accepted.
    pub enabled: bool,
    /// Scope string overriding the provider default, if set.
    pub scope: Option<String>,
    /// Display mode hint passed to providers that honor one (Facebook).
    pub display: Option<String>,
}

impl ProviderSettings {
    /// A disabled placeholder for providers with no configured credentials.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            enabled: false,
            scope: None,
            display: None,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Public base URL of this service (no trailing slash), used to build
    /// provider return URIs and fragment-redirect targets.
    pub base_url: String,
    /// Listen address for the server binary.
    pub listen_addr: String,
    /// Master key for signing service tokens (HS256).
    pub master_key: String,
    /// 32-byte key material for cookie-value encryption (base64).
    pub cookie_encryption_key: String,
    /// Per-provider settings.
    pub providers: HashMap<ProviderName, ProviderSettings>,
    /// Origins allowed for completion-action delivery and bridge checks.
    pub cors_whitelist: Vec<String>,
    /// Package identifier accepted as the single-sign-on redirect target
    /// (platform SSO); the target must equal this value plus a trailing `/`.
    pub package_sid: Option<String>,
    /// Alternate sovereign-cloud login domain suffix for AAD
    /// (e.g. "de" or "cn"; default "com").
    pub domain_suffix: Option<String>,
    /// Floor between forced certificate refreshes, in minutes.
    pub min_refresh_interval_minutes: u64,
    /// Environment mode.
    pub environment: AppEnvironment,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment =
            AppEnvironment::from_env_str(&env::var("APP_ENV").unwrap_or_default());

        let base_url = require_var("BASE_URL")?;
        let listen_addr = env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let master_key =
            env::var("MASTER_KEY").unwrap_or_else(|_| INSECURE_MASTER_KEY.to_string());
        if environment.is_production() && master_key == INSECURE_MASTER_KEY {
            return Err(ConfigError::InsecureDefault("MASTER_KEY".to_string()));
        }

        let cookie_encryption_key = env::var("COOKIE_ENCRYPTION_KEY")
            .unwrap_or_else(|_| "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string());
        if environment.is_production()
            && cookie_encryption_key.bytes().all(|b| b == b'A' || b == b'=')
        {
            return Err(ConfigError::InsecureDefault(
                "COOKIE_ENCRYPTION_KEY".to_string(),
            ));
        }

        let min_refresh_interval_minutes = match env::var("MIN_REFRESH_INTERVAL_MINUTES") {
            Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
                var: "MIN_REFRESH_INTERVAL_MINUTES".to_string(),
                message: format!("expected an integer, got '{v}'"),
            })?,
            Err(_) => DEFAULT_MIN_REFRESH_INTERVAL_MINUTES,
        };

        let cors_whitelist = env::var("CORS_WHITELIST")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut providers = HashMap::new();
        for name in ProviderName::ALL {
            providers.insert(name, provider_settings_from_env(name));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            listen_addr,
            master_key,
            cookie_encryption_key,
            providers,
            cors_whitelist,
            package_sid: env::var("PACKAGE_SID").ok(),
            domain_suffix: env::var("DOMAIN_SUFFIX").ok(),
            min_refresh_interval_minutes,
            environment,
        })
    }

    /// Settings for a provider; a disabled placeholder when unconfigured.
    #[must_use]
    pub fn provider(&self, name: ProviderName) -> ProviderSettings {
        self.providers
            .get(&name)
            .cloned()
            .unwrap_or_else(ProviderSettings::disabled)
    }

    /// Check an origin against the CORS whitelist (exact match, no trailing
    /// slash, case-insensitive).
    #[must_use]
    pub fn is_origin_whitelisted(&self, origin: &str) -> bool {
        let normalized = origin.trim_end_matches('/').to_lowercase();
        self.cors_whitelist
            .iter()
            .any(|allowed| allowed.to_lowercase() == normalized)
    }
}

/// Read `{PROVIDER}_CLIENT_ID` / `{PROVIDER}_CLIENT_SECRET` and friends.
fn provider_settings_from_env(name: ProviderName) -> ProviderSettings {
    let prefix = name.to_string().to_uppercase();
    let client_id = env::var(format!("{prefix}_CLIENT_ID")).unwrap_or_default();
    let client_secret = env::var(format!("{prefix}_CLIENT_SECRET")).unwrap_or_default();
    let explicit_enabled = env::var(format!("{prefix}_ENABLED"))
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .ok();

    ProviderSettings {
        enabled: explicit_enabled.unwrap_or(!client_id.is_empty() && !client_secret.is_empty()),
        client_id,
        client_secret,
        scope: env::var(format!("{prefix}_SCOPE")).ok(),
        display: env::var(format!("{prefix}_DISPLAY")).ok(),
    }
}

fn require_var(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}
