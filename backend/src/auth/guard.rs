//! Request-time authentication.
//!
//! Every request either passes (and carries an [`AuthContext`]) or is denied
//! with 401 before the handler runs. Which routes skip the check is declared
//! up front in a [`RoutePolicy`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use schoolbus_auth_common::Role;

use crate::error::AuthError;
use crate::logging::token_fingerprint;
use crate::users::User;
use crate::AppState;

/// Who may call a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// No authentication at all.
    Public,
    /// Any authenticated, active user.
    Authenticated,
    /// Authenticated users holding one of these roles.
    Roles(Vec<Role>),
}

#[derive(Debug, Clone)]
pub struct RouteRule {
    pub method: Method,
    pub path: String,
    pub access: Access,
}

impl RouteRule {
    fn matches_method(&self, method: &Method) -> bool {
        self.method == *method || (self.method == Method::GET && *method == Method::HEAD)
    }
}

/// Per-route access configuration. Routes without a rule require
/// authentication.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    rules: Vec<RouteRule>,
}

impl RoutePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_rule(mut self, method: Method, path: &str, access: Access) -> Self {
        self.rules.push(RouteRule {
            method,
            path: path.to_string(),
            access,
        });
        self
    }

    pub fn public(self, method: Method, path: &str) -> Self {
        self.with_rule(method, path, Access::Public)
    }

    pub fn authenticated(self, method: Method, path: &str) -> Self {
        self.with_rule(method, path, Access::Authenticated)
    }

    pub fn roles(self, method: Method, path: &str, roles: &[Role]) -> Self {
        self.with_rule(method, path, Access::Roles(roles.to_vec()))
    }

    /// Access for a request. A `GET` rule also covers `HEAD`, which axum
    /// serves through `get` routes.
    pub fn access_for(&self, method: &Method, path: &str) -> Access {
        self.rules
            .iter()
            .find(|rule| rule.path == path && rule.matches_method(method))
            .map(|rule| rule.access.clone())
            .unwrap_or(Access::Authenticated)
    }
}

/// The authenticated caller, handed to handlers explicitly.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Middleware enforcing the route policy.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let access = state
        .route_policy
        .access_for(request.method(), request.uri().path());

    if access == Access::Public {
        return next.run(request).await;
    }

    let Some(token) = bearer_token(request.headers()).map(str::to_owned) else {
        tracing::debug!(path = %request.uri().path(), "No bearer token");
        return AuthError::MissingToken.into_response();
    };

    let user = match state.auth.authenticate_bearer(&token).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(
                path = %request.uri().path(),
                token = %token_fingerprint(&token),
                error = %e,
                "Authentication failed"
            );
            return e.into_response();
        }
    };

    if let Access::Roles(allowed) = &access {
        if !allowed.contains(&user.role) {
            tracing::warn!(user_id = %user.id, role = %user.role, "Role not permitted");
            return AuthError::Forbidden(user.role).into_response();
        }
    }

    request.extensions_mut().insert(AuthContext { user });
    next.run(request).await
}
