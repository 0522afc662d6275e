//! Login error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Provider name enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Google,
    Facebook,
    Twitter,
    MicrosoftAccount,
    Aad,
}

impl ProviderName {
    /// All providers the service knows about.
    pub const ALL: [ProviderName; 5] = [
        ProviderName::Google,
        ProviderName::Facebook,
        ProviderName::Twitter,
        ProviderName::MicrosoftAccount,
        ProviderName::Aad,
    ];
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderName::Google => write!(f, "google"),
            ProviderName::Facebook => write!(f, "facebook"),
            ProviderName::Twitter => write!(f, "twitter"),
            ProviderName::MicrosoftAccount => write!(f, "microsoftaccount"),
            ProviderName::Aad => write!(f, "aad"),
        }
    }
}

impl std::str::FromStr for ProviderName {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google" => Ok(ProviderName::Google),
            "facebook" => Ok(ProviderName::Facebook),
            "twitter" => Ok(ProviderName::Twitter),
            "microsoftaccount" => Ok(ProviderName::MicrosoftAccount),
            "aad" | "windowsazureactivedirectory" => Ok(ProviderName::Aad),
            _ => Err(AuthError::UnsupportedProvider {
                provider: s.to_string(),
            }),
        }
    }
}

/// Login orchestration errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Malformed request: {reason}")]
    BadInput { reason: String },

    #[error("Unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },

    #[error("Provider '{provider}' is disabled or misconfigured: {message}")]
    ConfigurationError {
        provider: ProviderName,
        message: String,
    },

    #[error("OAuth state mismatch")]
    StateMismatch,

    #[error("Nonce mismatch in provider token")]
    NonceMismatch,

    #[error("Provider {provider} call failed: {reason}")]
    ProviderError {
        provider: ProviderName,
        reason: String,
    },

    #[error("Token validation failed: {reason}")]
    TokenValidation { reason: String },

    #[error("Origin '{origin}' is not whitelisted")]
    OriginNotWhitelisted { origin: String },

    #[error("Encryption error: {operation}")]
    EncryptionError { operation: String },

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

/// Error response structure for API responses.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl AuthError {
    /// Stable error code for API responses and redirect fragments.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::BadInput { .. } => "bad_input",
            AuthError::UnsupportedProvider { .. } => "unsupported_provider",
            AuthError::ConfigurationError { .. } => "configuration_error",
            AuthError::StateMismatch => "state_mismatch",
            AuthError::NonceMismatch => "nonce_mismatch",
            AuthError::ProviderError { .. } => "provider_error",
            AuthError::TokenValidation { .. } => "token_validation_failed",
            AuthError::OriginNotWhitelisted { .. } => "origin_not_whitelisted",
            AuthError::EncryptionError { .. } => "encryption_error",
            AuthError::HttpError(_) => "http_error",
            AuthError::JsonError(_) => "json_error",
            AuthError::JwtError(_) => "jwt_error",
            AuthError::InternalError { .. } => "internal_error",
        }
    }

    /// HTTP status for direct (non-redirect) responses.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::BadInput { .. } => StatusCode::BAD_REQUEST,
            AuthError::UnsupportedProvider { .. } => StatusCode::BAD_REQUEST,
            AuthError::ConfigurationError { .. } => StatusCode::UNAUTHORIZED,
            AuthError::StateMismatch => StatusCode::UNAUTHORIZED,
            AuthError::NonceMismatch => StatusCode::UNAUTHORIZED,
            AuthError::ProviderError { .. } => StatusCode::BAD_GATEWAY,
            AuthError::TokenValidation { .. } => StatusCode::UNAUTHORIZED,
            AuthError::OriginNotWhitelisted { .. } => StatusCode::FORBIDDEN,
            AuthError::EncryptionError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::HttpError(_) => StatusCode::BAD_GATEWAY,
            AuthError::JsonError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::JwtError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to clients. Provider-controlled and
    /// library-internal detail goes to the log, not the HTTP body.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            AuthError::HttpError(e) => {
                tracing::error!("Login HTTP client error: {:?}", e);
                "An HTTP client error occurred".to_string()
            }
            AuthError::JsonError(e) => {
                tracing::error!("Login JSON error: {:?}", e);
                "A data processing error occurred".to_string()
            }
            AuthError::JwtError(e) => {
                tracing::error!("Login JWT error: {:?}", e);
                "A token processing error occurred".to_string()
            }
            AuthError::InternalError { message } => {
                tracing::error!("Login internal error: {}", message);
                "An internal error occurred".to_string()
            }
            AuthError::EncryptionError { operation } => {
                tracing::error!("Login encryption error: {}", operation);
                "An encryption error occurred".to_string()
            }
            AuthError::ConfigurationError { provider, .. } => {
                tracing::error!(provider = %provider, "Provider configuration error");
                format!("The '{provider}' provider is not available")
            }
            AuthError::ProviderError { provider, reason } => {
                tracing::warn!(provider = %provider, reason = %reason, "Provider call failed");
                format!("Authentication with {provider} failed")
            }
            AuthError::TokenValidation { reason } => {
                tracing::warn!(reason = %reason, "Token validation failed");
                "The provider token could not be validated".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.error_code().to_string(),
            message: self.public_message(),
        };
        (status, axum::Json(body)).into_response()
    }
}

/// Result type alias for login operations.
pub type AuthResult<T> = Result<T, AuthError>;
