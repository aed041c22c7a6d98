//! Bearer token middleware for axum routes.
//!
//! [`require_bearer`] validates the `Authorization: Bearer` token through
//! the storage facade and stores the verified [`Claims`] in the request
//! extensions. Only access tokens are accepted; refresh and ID tokens, like
//! every other failure, end the request with 401.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/admin/clients", get(list_clients))
//!     .layer(axum::middleware::from_fn_with_state(facade.clone(), require_bearer));
//! ```

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::AuthError;
use crate::facade::{OidcStorage, StorageFacade};
use crate::types::Claims;

/// Rejects requests without a live access token.
pub async fn require_bearer(
    State(facade): State<StorageFacade>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(header) = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        tracing::debug!(path = %req.uri().path(), "no Authorization header");
        return unauthorized_response("Authentication required");
    };

    let Some(token) = bearer_token(header).map(str::to_string) else {
        return unauthorized_response("Invalid Authorization header format");
    };

    match facade.validate_access_token(&token).await {
        Ok(claims) => {
            tracing::debug!(
                client_id = %claims.client_id,
                subject = claims.sub.as_deref(),
                "bearer token accepted"
            );
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) if e.is_server_error() => {
            tracing::error!(error = %e, "bearer validation failed");
            unauthorized_response("Token could not be verified")
        }
        Err(e) => {
            tracing::debug!(error = %e, "bearer token rejected");
            unauthorized_response(&rejection_message(&e))
        }
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn rejection_message(err: &AuthError) -> String {
    match err {
        AuthError::Expired { .. } => "Token expired".to_string(),
        AuthError::TokenRevoked => "Token revoked".to_string(),
        AuthError::NotFound { .. } => "Unknown token".to_string(),
        AuthError::InvalidToken { .. } => "Not a valid access token".to_string(),
        other => other.to_string(),
    }
}

fn unauthorized_response(message: &str) -> Response {
    let challenge = format!(
        "Bearer error=\"invalid_token\", error_description=\"{}\"",
        message.replace('"', "'")
    );
    let challenge = HeaderValue::from_str(&challenge)
        .unwrap_or_else(|_| HeaderValue::from_static("Bearer error=\"invalid_token\""));

    let body = json!({
        "error": "invalid_token",
        "error_description": message,
    });
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, challenge)],
        Json(body),
    )
        .into_response()
}

/// Verified claims of the current request, for handlers behind
/// [`require_bearer`].
pub type BearerClaims = axum::Extension<Claims>;
