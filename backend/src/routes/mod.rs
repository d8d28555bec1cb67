pub mod auth;
pub mod health;

use std::sync::Arc;

use axum::{http::Method, middleware, Router};

use crate::auth::{require_auth, RoutePolicy};
use crate::logging::request_logger;
use crate::AppState;

/// Access rules for the routes served by [`app`]. Anything not listed here
/// requires a valid bearer token.
pub fn route_policy() -> RoutePolicy {
    RoutePolicy::new()
        .public(Method::GET, "/health")
        .public(Method::POST, "/auth/login")
        .authenticated(Method::GET, "/auth/profile")
}

/// The full HTTP application, guarded by [`require_auth`].
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(middleware::from_fn(request_logger))
        .with_state(state)
}
