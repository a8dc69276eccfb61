//! Token authentication

use crate::error::{ApiError, ErrorCode};
use crate::state::ListenerState;
use hyper::header::AUTHORIZATION;
use hyper::{Body, Request, Response};
use subtle::ConstantTimeEq;
use tracing::debug;

const SCHEME: &str = "Token ";

/// Reject the request unless it carries the configured token
///
/// Returns `None` when the request may proceed.
pub(crate) fn check(req: &Request<Body>, state: &ListenerState) -> Option<Response<Body>> {
    let expected = state.config.auth_token()?;

    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(SCHEME));

    if presented.is_some_and(|token| token_matches(token, expected)) {
        return None;
    }

    state.stats.authentication_failures.incr(1);
    debug!(path = req.uri().path(), "rejected request with missing or invalid token");
    Some(ApiError::new(ErrorCode::Unauthorized, "unauthorized access").into_response())
}

fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
