use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use std::time::Instant;

/// Middleware that logs HTTP requests; failed auth is logged at WARN.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let has_bearer = request.headers().contains_key(axum::http::header::AUTHORIZATION);

    let response = next.run(request).await;

    let status = response.status();
    let duration = start.elapsed();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        tracing::warn!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            bearer = has_bearer,
            duration_ms = %duration.as_millis(),
            "HTTP request denied"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            bearer = has_bearer,
            duration_ms = %duration.as_millis(),
            "HTTP request"
        );
    }

    response
}

/// Short, stable identifier for a token, safe to put in logs.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}
