//! Login and profile endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use schoolbus_auth_common::{LoginRequest, LoginResponse, PublicUser};

use crate::auth::AuthContext;
use crate::error::AuthError;
use crate::AppState;

/// `POST /auth/login`: exchange a Firebase ID token for a session token.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    let outcome = state.auth.login(&request.firebase_token).await?;

    Ok(Json(LoginResponse {
        user: outcome.user,
        access_token: outcome.session_token,
    }))
}

/// `GET /auth/profile`: the caller's own public view.
async fn profile(ctx: AuthContext) -> Json<PublicUser> {
    Json(ctx.user.public_view())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/profile", get(profile))
}
