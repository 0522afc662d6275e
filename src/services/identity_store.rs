//! Interface to the optional user-identity persistence service.

use async_trait::async_trait;

use crate::error::AuthResult;
use crate::providers::AuthorizationDetails;

/// A persisted user record.
#[derive(Debug, Clone)]
pub struct StoredUser {
    pub id: String,
}

/// Persistence collaborator for federated identities.
///
/// When disabled, the orchestrator embeds claims and secrets in the issued
/// token instead of looking them up by user ID.
#[async_trait]
pub trait UserIdentityStore: Send + Sync {
    /// Whether identity persistence is enabled for this deployment.
    fn is_enabled(&self) -> bool;

    /// Record (or update) a federated identity and return the owning user.
    async fn add_user_identity(
        &self,
        provider_key: &str,
        provider_id: &str,
        details: &AuthorizationDetails,
    ) -> AuthResult<StoredUser>;
}

/// Default store used when identity persistence is turned off.
#[derive(Debug, Clone, Default)]
pub struct DisabledIdentityStore;

#[async_trait]
impl UserIdentityStore for DisabledIdentityStore {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn add_user_identity(
        &self,
        _provider_key: &str,
        _provider_id: &str,
        _details: &AuthorizationDetails,
    ) -> AuthResult<StoredUser> {
        Err(crate::error::AuthError::InternalError {
            message: "identity persistence is disabled".to_string(),
        })
    }
}
