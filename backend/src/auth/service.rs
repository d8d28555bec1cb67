//! Login flow and token validation.
//!
//! Login is strictly sequential: verify the provider token, resolve the local
//! user by firebase uid (creating it on first sign-in), then sign a session
//! token. Every failure becomes an [`AuthError`]; the cause is logged here and
//! never returned to the client.

use std::sync::Arc;

use chrono::Utc;
use schoolbus_auth_common::PublicUser;

use crate::error::AuthError;
use crate::identity::{DecodedIdentity, IdentityProvider, ProviderUserRecord};
use crate::logging::token_fingerprint;
use crate::session::{SessionClaims, SessionCodec, SessionError, SessionPayload};
use crate::users::{NewUser, RepositoryError, User, UserRepository};

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: PublicUser,
    pub session_token: String,
}

/// Orchestrates identity provider, user store and session codec.
pub struct AuthService {
    provider: Arc<dyn IdentityProvider>,
    users: Arc<dyn UserRepository>,
    sessions: SessionCodec,
}

impl AuthService {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        users: Arc<dyn UserRepository>,
        sessions: SessionCodec,
    ) -> Self {
        Self {
            provider,
            users,
            sessions,
        }
    }

    /// Exchange a provider token for a local session.
    pub async fn login(&self, provider_token: &str) -> Result<LoginOutcome, AuthError> {
        let identity = self.verify_provider_token(provider_token).await?;

        let user = match self.users.find_by_external_id(&identity.uid).await? {
            Some(mut user) => {
                ensure_active(&user)?;
                let now = Utc::now();
                // Best-effort: a failed timestamp write must not block sign-in
                match self.users.update_last_login(&user.id, now).await {
                    Ok(()) => user.last_login_at = Some(now),
                    Err(e) => {
                        tracing::warn!(user_id = %user.id, error = %e, "Failed to record last login");
                    }
                }
                user
            }
            None => self.provision(&identity).await?,
        };

        let session_token = self.sessions.sign(&SessionPayload {
            user_id: user.id.clone(),
            email: user.email.clone(),
            roles: vec![user.role],
            firebase_uid: user.firebase_uid.clone(),
        })?;

        tracing::info!(user_id = %user.id, role = %user.role, "Login succeeded");

        Ok(LoginOutcome {
            user: user.public_view(),
            session_token,
        })
    }

    /// Create the local account for a first-time sign-in.
    async fn provision(&self, identity: &DecodedIdentity) -> Result<User, AuthError> {
        let record = match self.provider.get_user(&identity.uid).await {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    uid = %identity.uid,
                    error = %e,
                    "Provider profile lookup failed, creating account without it"
                );
                None
            }
        };
        let record = record.unwrap_or_default();
        if record.disabled {
            tracing::warn!(uid = %identity.uid, "Provider account is disabled, not provisioning");
            return Err(AuthError::AccountDisabled(identity.uid.clone()));
        }

        let email = identity
            .email
            .clone()
            .or_else(|| record.email.clone())
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| AuthError::MissingEmail(identity.uid.clone()))?;

        let display_name = non_blank(identity.name.as_deref())
            .or_else(|| non_blank(record.display_name.as_deref()));
        let (first_name, last_name) = derive_names(display_name, &email);

        let new_user = NewUser {
            first_name,
            last_name,
            email,
            phone_number: record.phone_number.clone(),
            role: None,
            firebase_uid: identity.uid.clone(),
            profile_image_url: profile_image(&record, identity),
        };

        match self.users.create(new_user).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, uid = %user.firebase_uid, "Provisioned new user");
                Ok(user)
            }
            Err(RepositoryError::Conflict(detail)) => {
                // A concurrent first login for the same uid won the insert
                tracing::info!(uid = %identity.uid, "User created concurrently, reusing it");
                let user = self
                    .users
                    .find_by_external_id(&identity.uid)
                    .await?
                    .ok_or(RepositoryError::Conflict(detail))?;
                ensure_active(&user)?;
                Ok(user)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn verify_provider_token(&self, token: &str) -> Result<DecodedIdentity, AuthError> {
        self.provider.verify_id_token(token).await.map_err(|e| {
            tracing::warn!(
                token = %token_fingerprint(token),
                error = %e,
                "Provider token verification failed"
            );
            AuthError::VerificationFailure(e)
        })
    }

    /// Resolve a provider token to its local user. No account is created.
    pub async fn validate_token(&self, token: &str) -> Result<User, AuthError> {
        let identity = self.verify_provider_token(token).await?;

        let user = self
            .users
            .find_by_external_id(&identity.uid)
            .await?
            .ok_or(AuthError::UserNotFound(identity.uid))?;
        ensure_active(&user)?;
        Ok(user)
    }

    /// Resolve a session token issued by [`AuthService::login`] to its user.
    pub async fn validate_session(&self, token: &str) -> Result<User, AuthError> {
        let claims = self.sessions.verify(token)?;
        self.user_for_session(claims).await
    }

    async fn user_for_session(&self, claims: SessionClaims) -> Result<User, AuthError> {
        let user = self
            .users
            .find_by_id(&claims.sub)
            .await?
            .ok_or(AuthError::UserNotFound(claims.sub))?;

        if user.firebase_uid != claims.firebase_uid {
            return Err(AuthError::CredentialMismatch);
        }
        ensure_active(&user)?;
        Ok(user)
    }

    /// Resolve a bearer token that may be either a session token or a
    /// provider token.
    pub async fn authenticate_bearer(&self, token: &str) -> Result<User, AuthError> {
        match self.sessions.verify(token) {
            Ok(claims) => self.user_for_session(claims).await,
            Err(SessionError::Expired) => Err(SessionError::Expired.into()),
            Err(_) => self.validate_token(token).await,
        }
    }

    /// Check that the user stored under `email` carries exactly `firebase_uid`.
    pub async fn validate_user(&self, email: &str, firebase_uid: &str) -> Result<User, AuthError> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(email.to_string()))?;

        if user.firebase_uid != firebase_uid {
            tracing::warn!(user_id = %user.id, "Firebase uid does not match stored user");
            return Err(AuthError::CredentialMismatch);
        }
        Ok(user)
    }
}

fn ensure_active(user: &User) -> Result<(), AuthError> {
    if user.is_active {
        Ok(())
    } else {
        Err(AuthError::AccountDisabled(user.id.clone()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn profile_image(record: &ProviderUserRecord, identity: &DecodedIdentity) -> Option<String> {
    record
        .photo_url
        .clone()
        .or_else(|| identity.picture.clone())
}

/// Split a display name into first and last name.
///
/// The first word is the first name and the remaining words, joined by single
/// spaces, the last name. Without a display name the first name is the local
/// part of the email and the last name is empty.
pub fn derive_names(display_name: Option<&str>, email: &str) -> (String, String) {
    let mut words = display_name.unwrap_or_default().split_whitespace();
    match words.next() {
        Some(first) => (first.to_string(), words.collect::<Vec<_>>().join(" ")),
        None => {
            let local = email.split_once('@').map_or(email, |(local, _)| local);
            (local.to_string(), String::new())
        }
    }
}
