//! Request routing
//!
//! | Route | Method | Auth |
//! |---|---|---|
//! | `/api/v2/write` | POST | token |
//! | `/api/v2/ready`, `/ready` | GET | none |
//! | `/api/v2/health`, `/health` | GET | none |
//! | `/ping` | GET, HEAD | none |
//! | anything else | any | token, then 404 |

use crate::error::{ApiError, ErrorCode};
use crate::state::ListenerState;
use crate::{auth, health, write};
use hyper::{Body, Method, Request, Response};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;

/// Entry point for every request on every connection
pub async fn route(
    req: Request<Body>,
    state: Arc<ListenerState>,
) -> Result<Response<Body>, Infallible> {
    state.stats.requests_received.incr(1);
    debug!("Write listener request: {} {}", req.method(), req.uri().path());

    let response = dispatch(req, &state).await;

    state.stats.requests_served.incr(1);
    Ok(response)
}

async fn dispatch(req: Request<Body>, state: &ListenerState) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, "/api/v2/write") => {
            if let Some(denied) = auth::check(&req, state) {
                return denied;
            }
            write::serve_write(req, state).await
        }
        (&Method::GET, "/api/v2/ready" | "/ready") => health::serve_ready(state),
        (&Method::GET, "/api/v2/health" | "/health") => health::serve_health(state),
        (&Method::GET | &Method::HEAD, "/ping") => health::serve_ping(state),
        _ => {
            if let Some(denied) = auth::check(&req, state) {
                return denied;
            }
            state.stats.not_founds_served.incr(1);
            ApiError::new(ErrorCode::NotFound, "not found").into_response()
        }
    }
}
