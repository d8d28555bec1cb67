//! Local user records and their storage.

mod sqlite;

pub use sqlite::SqliteUserRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schoolbus_auth_common::{PublicUser, Role};
use serde::Serialize;

/// Local user record, created on first sign-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    /// Local id (UUID v4)
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    /// Unique across all users
    pub email: String,
    pub phone_number: Option<String>,
    pub role: Role,
    /// Firebase `uid`; unique and never changed once set
    pub firebase_uid: String,
    /// Whether the user may sign in
    pub is_active: bool,
    /// When the user last logged in (None until the second login)
    pub last_login_at: Option<DateTime<Utc>>,
    pub profile_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// The view a client may see of this user.
    pub fn public_view(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: self.role,
        }
    }
}

/// Fields supplied when creating a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    /// Defaults to [`Role::Parent`] when not given.
    pub role: Option<Role>,
    pub firebase_uid: String,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("User already exists: {0}")]
    Conflict(String),
    #[error("User not found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(String),
}

/// Storage for local users.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, RepositoryError>;

    /// Resolve a provider identity to its local account.
    async fn find_by_external_id(&self, firebase_uid: &str)
        -> Result<Option<User>, RepositoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    /// Insert a user. Fails with [`RepositoryError::Conflict`] when the email or
    /// firebase uid is already taken.
    async fn create(&self, new_user: NewUser) -> Result<User, RepositoryError>;

    /// Record a successful login.
    async fn update_last_login(&self, id: &str, at: DateTime<Utc>)
        -> Result<(), RepositoryError>;
}
