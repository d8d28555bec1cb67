//! SchoolBus Auth Common Types
//!
//! Wire types shared by the auth service and the platform services that call it.

pub mod auth;
pub mod role;

pub use auth::{ErrorBody, ErrorDetail, LoginRequest, LoginResponse, PublicUser};
pub use role::{ParseRoleError, Role};
