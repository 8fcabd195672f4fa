use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::jwt::JwtHandler;
use super::models::CallerIdentity;

/// Attach the caller identity when a valid bearer token is present.
///
/// Requests without a (valid) token pass through anonymously; each handler
/// decides whether it needs a caller.
pub async fn optional_auth_middleware(
    State(jwt_handler): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Response {
    let caller = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .and_then(|token| jwt_handler.validate_token(token.trim()).ok())
        .map(CallerIdentity::from);

    if let Some(caller) = caller {
        req.extensions_mut().insert(caller);
    }

    next.run(req).await
}
