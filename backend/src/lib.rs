pub mod auth;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod routes;
pub mod session;
pub mod test_util;
pub mod users;

pub use auth::{AuthContext, AuthService, RoutePolicy};
pub use config::Config;
pub use error::AuthError;
pub use identity::{FirebaseAuth, IdentityProvider};
pub use session::SessionCodec;
pub use users::{SqliteUserRepository, User, UserRepository};

/// Shared application state.
pub struct AppState {
    pub auth: AuthService,
    /// Which routes skip authentication.
    pub route_policy: RoutePolicy,
}
