//! Application state and route table.

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::AppConfig;
use crate::error::AuthResult;
use crate::handlers::{list_providers, login_done, login_get, login_post};
use crate::providers::ProviderRegistry;
use crate::services::{DisabledIdentityStore, EncryptionService, TokenIssuer, UserIdentityStore};

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ProviderRegistry>,
    pub issuer: TokenIssuer,
    pub cookie_crypto: Arc<EncryptionService>,
    pub identity_store: Arc<dyn UserIdentityStore>,
}

impl AppState {
    /// Build all collaborators from configuration.
    ///
    /// Identity persistence defaults to disabled; deployments with a store
    /// swap it in via [`AppState::with_identity_store`].
    pub fn from_config(config: AppConfig) -> AuthResult<Self> {
        let cookie_crypto = EncryptionService::from_base64(&config.cookie_encryption_key)?;
        let issuer = TokenIssuer::new(&config.master_key);
        let registry = ProviderRegistry::from_config(&config);
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            issuer,
            cookie_crypto: Arc::new(cookie_crypto),
            identity_store: Arc::new(DisabledIdentityStore),
        })
    }

    #[must_use]
    pub fn with_identity_store(mut self, store: Arc<dyn UserIdentityStore>) -> Self {
        self.identity_store = store;
        self
    }
}

/// Build the service router.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/login", get(list_providers))
        .route("/login/done", get(login_done))
        .route("/login/:provider", get(login_get).post(login_post))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS restricted to the configured origin whitelist.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_whitelist
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %origin, "Skipping unparseable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}
