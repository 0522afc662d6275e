//! Federated login service.
//!
//! Orchestrates OAuth/OIDC logins against Google, Facebook, Twitter,
//! Microsoft Account, and Azure Active Directory, and exchanges a verified
//! provider identity for a service-signed token.
//!
//! Two flow shapes share one engine: the client flow (`POST
//! /login/{provider}`), where the app already holds a provider token, and
//! the server flow (`GET /login/{provider}`), where the browser is
//! redirected through the provider's consent pages and back. All transient
//! flow state rides in short-lived reserved-prefix cookies, so the service
//! itself is stateless.

pub mod config;
pub mod cookies;
pub mod error;
pub mod handlers;
pub mod providers;
pub mod router;
pub mod services;

pub use config::AppConfig;
pub use error::{AuthError, AuthResult, ProviderName};
pub use router::{build_router, AppState};
