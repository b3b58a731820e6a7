//! Axum middleware placing an [`AuthGuard`] in front of a tool server
//!
//! - No credential: request continues with [`Caller::Anonymous`]
//! - Rate limited or invalid credential: identical 401 (the response does not
//!   reveal whether the credential was otherwise valid)
//! - Verifier failure: 503

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error};

use super::{AuthGuard, GuardDecision, Principal};

/// Caller identity injected into request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// No credential presented (guest access)
    Anonymous,
    /// Verified credential
    Authenticated(Principal),
}

/// Authentication middleware
pub async fn auth_middleware(
    State(guard): State<Arc<AuthGuard>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match guard.authorize(authorization.as_deref()).await {
        Ok(GuardDecision::Anonymous) => {
            debug!(path = %request.uri().path(), "No credential, continuing as anonymous");
            request.extensions_mut().insert(Caller::Anonymous);
            next.run(request).await
        }
        Ok(GuardDecision::Authenticated(principal)) => {
            request
                .extensions_mut()
                .insert(Caller::Authenticated(principal));
            next.run(request).await
        }
        Ok(GuardDecision::Rejected(_)) => unauthorized_response(),
        Err(e) => {
            error!(error = %e, "Token verification unavailable");
            unavailable_response()
        }
    }
}

/// Create a 401 Unauthorized response
fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer error=\"invalid_token\"")],
        Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32001,
                "message": "Authentication failed"
            },
            "id": null
        })),
    )
        .into_response()
}

/// Create a 503 Service Unavailable response
fn unavailable_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, "5")],
        Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32000,
                "message": "Authentication temporarily unavailable"
            },
            "id": null
        })),
    )
        .into_response()
}
