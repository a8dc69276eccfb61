//! Ready, health and ping endpoints

use crate::state::ListenerState;
use chrono::SecondsFormat;
use hyper::{header, Body, Response, StatusCode};
use std::time::Duration;

/// Handle `/ready` and `/api/v2/ready` (liveness only, ignores saturation)
pub(crate) fn serve_ready(state: &ListenerState) -> Response<Body> {
    state.stats.ready_served.incr(1);

    let body = serde_json::json!({
        "started": state.started.to_rfc3339_opts(SecondsFormat::Nanos, true),
        "status": "ready",
        "up": format_uptime(state.started_at.elapsed()),
    });
    json_response(StatusCode::OK, &body)
}

/// Handle `/health` and `/api/v2/health`
pub(crate) fn serve_health(state: &ListenerState) -> Response<Body> {
    state.stats.health_served.incr(1);

    let admission = &state.admission;
    if admission.is_saturated() {
        let body = serde_json::json!({
            "status": "fail",
            "message": format!(
                "pending undelivered metrics ({}) is above limit",
                admission.pending()
            ),
        });
        return json_response(StatusCode::SERVICE_UNAVAILABLE, &body);
    }

    let body = serde_json::json!({
        "status": "pass",
        "message": "ready for queries and writes",
    });
    json_response(StatusCode::OK, &body)
}

/// Handle `/ping`
pub(crate) fn serve_ping(state: &ListenerState) -> Response<Body> {
    state.stats.ping_served.incr(1);

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

/// `1h2m3.045s`, with leading zero units left out
fn format_uptime(up: Duration) -> String {
    let secs = up.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);
    let millis = up.subsec_millis();

    if hours > 0 {
        format!("{}h{}m{}.{:03}s", hours, minutes, seconds, millis)
    } else if minutes > 0 {
        format!("{}m{}.{:03}s", minutes, seconds, millis)
    } else {
        format!("{}.{:03}s", seconds, millis)
    }
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
