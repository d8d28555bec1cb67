//! Authentication errors and their HTTP rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use schoolbus_auth_common::{ErrorBody, ErrorDetail, Role};

use crate::identity::ProviderError;
use crate::session::SessionError;
use crate::users::RepositoryError;

/// Why a login or a protected request was refused.
///
/// The variants exist for server-side logs. Clients only ever see a generic
/// 401 (or 403 for a role mismatch).
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing or malformed bearer token")]
    MissingToken,

    #[error("Provider token verification failed: {0}")]
    VerificationFailure(ProviderError),

    #[error("No local user for {0}")]
    UserNotFound(String),

    #[error("Credentials do not match stored user")]
    CredentialMismatch,

    #[error("User {0} is disabled")]
    AccountDisabled(String),

    #[error("Provider identity {0} has no email address")]
    MissingEmail(String),

    #[error("User store error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Session token error: {0}")]
    Session(#[from] SessionError),

    #[error("Role {0} is not allowed here")]
    Forbidden(Role),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AuthError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", "Insufficient role"),
            _ => (StatusCode::UNAUTHORIZED, "unauthorized", "Authentication failed"),
        };

        let body = Json(ErrorBody {
            error: ErrorDetail {
                error_type: error_type.to_string(),
                message: message.to_string(),
            },
        });

        (status, body).into_response()
    }
}
