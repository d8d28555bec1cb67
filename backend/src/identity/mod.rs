//! Identity provider: verifies Firebase ID tokens and looks up provider accounts.

mod credentials;
mod firebase;
mod jwks;

pub use credentials::{AccessTokenSource, Credentials, ServiceAccountKey};
pub use firebase::FirebaseAuth;
pub use jwks::FirebaseTokenVerifier;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

/// Identity attested by a verified provider token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedIdentity {
    /// Provider subject (`uid`)
    pub uid: String,
    pub email: Option<String>,
    /// Display name, if the account has one
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Account details held by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderUserRecord {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
    pub photo_url: Option<String>,
    pub disabled: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Token expired")]
    TokenExpired,
    #[error("Key not found for kid: {0}")]
    KeyNotFound(String),
    #[error("JWKS fetch error: {0}")]
    KeyFetch(String),
    #[error("Invalid credentials: {0}")]
    Credentials(String),
    #[error("Access token error: {0}")]
    AccessToken(String),
    #[error("Account lookup failed: {0}")]
    Lookup(String),
    #[error("No provider account for {0}")]
    UserNotFound(String),
    #[error("No Firebase project id configured")]
    MissingProjectId,
    #[error("Identity provider already initialized")]
    AlreadyInitialized,
}

/// Remote identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a provider-issued ID token.
    async fn verify_id_token(&self, token: &str) -> Result<DecodedIdentity, ProviderError>;

    /// Fetch the provider's account record by uid.
    async fn get_user(&self, uid: &str) -> Result<ProviderUserRecord, ProviderError>;

    /// Fetch the provider's account record by email.
    async fn get_user_by_email(&self, email: &str) -> Result<ProviderUserRecord, ProviderError>;
}

static PROVIDER: OnceLock<Arc<dyn IdentityProvider>> = OnceLock::new();

/// Install the process-wide provider handle.
///
/// Must be called once at startup. A second call fails with
/// [`ProviderError::AlreadyInitialized`] and leaves the first handle in place.
pub fn install(provider: Arc<dyn IdentityProvider>) -> Result<Arc<dyn IdentityProvider>, ProviderError> {
    PROVIDER
        .set(provider.clone())
        .map_err(|_| ProviderError::AlreadyInitialized)?;
    tracing::info!("Identity provider installed");
    Ok(provider)
}
