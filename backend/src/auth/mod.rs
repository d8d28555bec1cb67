//! Login flow and the request guard.

pub mod guard;
pub mod service;

pub use guard::{bearer_token, require_auth, Access, AuthContext, RoutePolicy, RouteRule};
pub use service::{derive_names, AuthService, LoginOutcome};
