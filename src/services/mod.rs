//! Core services: certificate caching, token validation and issuance,
//! cookie-value encryption, identity persistence interface.

pub mod cert_cache;
pub mod encryption;
pub mod identity_store;
pub mod token_issuer;
pub mod token_validator;

pub use cert_cache::{CertCache, KeySet, ProviderKey};
pub use encryption::EncryptionService;
pub use identity_store::{DisabledIdentityStore, StoredUser, UserIdentityStore};
pub use token_issuer::{IssuedToken, ServiceTokenClaims, TokenIssuer};
pub use token_validator::{IdTokenClaims, TokenValidator, ValidationParams};
