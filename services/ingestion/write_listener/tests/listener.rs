//! End-to-end tests against a running listener over real TCP connections

mod common;

use common::*;
use hyper::{Body, Method, StatusCode};
use line_protocol::FieldValue;
use std::sync::Arc;
use std::time::Duration;
use torq_write_listener::test_utils::CollectingAccumulator;
use torq_write_listener::{Clock, ListenerError, WriteListener, WriteListenerConfig};

#[tokio::test]
async fn test_write_single_record() {
    let server = TestListener::start(config()).await;

    let reply = server.post("/api/v2/write?bucket=mybucket", TEST_MSG).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert!(reply.body.is_empty());

    let records = server.accumulator.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.name, "cpu_load_short");
    assert_eq!(record.tag("host"), Some("server01"));
    assert_eq!(record.field("value"), Some(&FieldValue::Float(12.0)));
    assert_eq!(record.timestamp, 1422568543702900257);

    server.listener.stop().await;
}

#[tokio::test]
async fn test_write_without_trailing_newline() {
    let server = TestListener::start(config()).await;

    let reply = server.post("/api/v2/write?bucket=mybucket", TEST_MSG_NO_NEWLINE).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert_eq!(server.accumulator.len(), 1);
}

#[tokio::test]
async fn test_write_multiple_records() {
    let server = TestListener::start(config()).await;

    let reply = server.post("/api/v2/write?bucket=mybucket", TEST_MSGS).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let hosts: Vec<String> = server
        .accumulator
        .records()
        .iter()
        .filter_map(|r| r.tag("host").map(str::to_string))
        .collect();
    assert_eq!(hosts, ["server02", "server03", "server04", "server05", "server06"]);
}

#[tokio::test]
async fn test_partial_write_still_delivers_valid_records() {
    let server = TestListener::start(config()).await;

    let reply = server.post("/api/v2/write?bucket=mybucket", TEST_PARTIAL).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["code"], "invalid");

    let hosts: Vec<String> = server
        .accumulator
        .records()
        .iter()
        .filter_map(|r| r.tag("host").map(str::to_string))
        .collect();
    assert_eq!(hosts, ["a", "c"]);
}

#[tokio::test]
async fn test_multiple_parse_errors_are_aggregated() {
    let server = TestListener::start(config()).await;
    let body = "cpu value=1\nbad one\ncpu value=2\nbad two\nbad three\n";

    let reply = server.post("/api/v2/write", body).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let json = reply.json();
    let message = json["message"].as_str().unwrap();
    assert!(message.starts_with("metric parse error: "));
    assert!(message.contains(" at 2:"));
    assert!(message.ends_with("(and 2 other parse errors)"));
    assert_eq!(json["line"], 2);
    assert_eq!(
        reply.headers["X-Influxdb-Error"].to_str().unwrap(),
        message
    );
    assert_eq!(server.accumulator.len(), 2);
}

#[tokio::test]
async fn test_bad_and_empty_bodies() {
    let server = TestListener::start(config()).await;

    assert_eq!(
        server.post("/api/v2/write?bucket=mybucket", BAD_MSG).await.status,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        server.post("/api/v2/write?bucket=mybucket", "").await.status,
        StatusCode::NO_CONTENT
    );
    assert!(server.accumulator.is_empty());
}

#[tokio::test]
async fn test_precision_seconds_scales_literal() {
    let server = TestListener::start(config()).await;

    let reply = server
        .post("/api/v2/write?bucket=mybucket&precision=s", "xyzzy value=42 1422568543\n")
        .await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let records = server.accumulator.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp, 1_422_568_543_000_000_000);
}

#[tokio::test]
async fn test_precision_seconds_truncates_clock() {
    let clock: Clock = Arc::new(|| 42 * 1_000_000_000 + 123_456_789);
    let server =
        TestListener::start_with(config(), CollectingAccumulator::new(), Some(clock)).await;

    let reply = server
        .post("/api/v2/write?bucket=mybucket&precision=s", "xyzzy value=42\n")
        .await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let records = server.accumulator.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp, 42_000_000_000);
}

#[tokio::test]
async fn test_gzip_body_matches_plain_body() {
    let plain = TestListener::start(config()).await;
    assert_eq!(
        plain.post("/api/v2/write", TEST_MSGS).await.status,
        StatusCode::NO_CONTENT
    );

    let compressed = TestListener::start(config()).await;
    let reply = compressed
        .send(
            Method::POST,
            "/api/v2/write",
            &[("Content-Encoding", "gzip")],
            Body::from(gzip(TEST_MSGS.as_bytes())),
        )
        .await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    assert_eq!(plain.accumulator.records(), compressed.accumulator.records());
}

#[tokio::test]
async fn test_corrupt_gzip_delivers_nothing() {
    let server = TestListener::start(config()).await;

    let mut body = gzip(TEST_MSGS.as_bytes());
    let len = body.len();
    body.truncate(len / 2);

    let reply = server
        .send(
            Method::POST,
            "/api/v2/write",
            &[("Content-Encoding", "gzip")],
            Body::from(body),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(server.accumulator.is_empty());
}

#[tokio::test]
async fn test_backpressure_sequence() {
    let config = WriteListenerConfig {
        max_undelivered_metrics: 1,
        ..config()
    };
    let server = TestListener::start_with(config, CollectingAccumulator::holding(), None).await;

    let reply = server.post("/api/v2/write", TEST_MSG).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let reply = server.post("/api/v2/write", TEST_MSG).await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(reply.json()["code"], "too many requests");

    assert!(server.accumulator.accept_one());
    let reply = server.post("/api/v2/write", TEST_MSG).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    assert_eq!(server.accumulator.len(), 2);
    assert_eq!(server.listener.admission().pending(), 1);
    server.accumulator.accept_all();
    assert_eq!(server.listener.admission().pending(), 0);
}

#[tokio::test]
async fn test_rejected_deliveries_free_slots() {
    let config = WriteListenerConfig {
        max_undelivered_metrics: 5,
        ..config()
    };
    let server = TestListener::start_with(config, CollectingAccumulator::holding(), None).await;

    assert_eq!(
        server.post("/api/v2/write", TEST_MSGS).await.status,
        StatusCode::NO_CONTENT
    );
    assert_eq!(server.accumulator.held_tokens(), 5);
    assert_eq!(
        server.post("/api/v2/write", TEST_MSG).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    server.accumulator.reject_all();
    let admission = server.listener.admission();
    assert_eq!(admission.pending(), 0);
    assert_eq!(admission.rejected_total(), 5);
    assert_eq!(
        server.post("/api/v2/write", TEST_MSG).await.status,
        StatusCode::NO_CONTENT
    );
}

#[tokio::test]
async fn test_batch_larger_than_ceiling_is_rejected() {
    let config = WriteListenerConfig {
        max_undelivered_metrics: 1,
        ..config()
    };
    let server = TestListener::start_with(config, CollectingAccumulator::holding(), None).await;

    let reply = server.post("/api/v2/write", TEST_MSGS).await;
    assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(reply.json()["code"], "request too large");
    assert!(server.accumulator.is_empty());
    assert_eq!(server.listener.admission().pending(), 0);
}

#[tokio::test]
async fn test_health_follows_saturation() {
    let config = WriteListenerConfig {
        max_undelivered_metrics: 1,
        ..config()
    };
    let server = TestListener::start_with(config, CollectingAccumulator::holding(), None).await;

    let reply = server.get("/api/v2/health").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["status"], "pass");

    server.post("/api/v2/write", TEST_MSG).await;

    let reply = server.get("/health").await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        reply.json()["message"],
        "pending undelivered metrics (1) is above limit"
    );

    // Ready only reports liveness
    assert_eq!(server.get("/ready").await.status, StatusCode::OK);

    server.accumulator.accept_all();
    assert_eq!(server.get("/health").await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_route_aliases_match() {
    let server = TestListener::start(config()).await;

    let long = server.get("/api/v2/health").await;
    let short = server.get("/health").await;
    assert_eq!(long.status, short.status);
    assert_eq!(long.body, short.body);

    let long = server.get("/api/v2/ready").await;
    let short = server.get("/ready").await;
    assert_eq!(long.status, StatusCode::OK);
    assert_eq!(long.headers["content-type"], "application/json");
    assert!(std::str::from_utf8(&long.body)
        .unwrap()
        .contains("\"status\":\"ready\""));
    assert_eq!(long.json()["started"], short.json()["started"]);
    assert_eq!(long.json()["status"], short.json()["status"]);
}

#[tokio::test]
async fn test_ping() {
    let server = TestListener::start(config()).await;

    let reply = server.get("/ping").await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert!(reply.body.is_empty());
}

#[tokio::test]
async fn test_token_auth() {
    let config = WriteListenerConfig {
        token: Some(TOKEN.to_string()),
        ..config()
    };
    let server = TestListener::start(config).await;

    let reply = server.post("/api/v2/write?bucket=mybucket", TEST_MSG).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(server.accumulator.is_empty());

    let authorization = format!("Token {}", TOKEN);
    let reply = server
        .send(
            Method::POST,
            "/api/v2/write?bucket=mybucket",
            &[("Authorization", authorization.as_str())],
            Body::from(TEST_MSG),
        )
        .await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert_eq!(server.accumulator.len(), 1);

    assert_eq!(server.get("/ping").await.status, StatusCode::NO_CONTENT);
    assert_eq!(server.stat("authentication_failures"), 1);
}

#[tokio::test]
async fn test_unknown_route() {
    let server = TestListener::start(config()).await;

    let reply = server.get("/foobar").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json()["code"], "not found");
    assert_eq!(server.stat("not_founds_served"), 1);
}

#[tokio::test]
async fn test_large_line_is_accepted() {
    let server = TestListener::start(config()).await;
    let body = format!("{}{}", huge_metric(), TEST_MSGS);

    let reply = server.post("/api/v2/write?bucket=mybucket", body).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let record = server.accumulator.get("super_long_metric").unwrap();
    assert_eq!(record.tag("foo"), Some("bar"));
    assert_eq!(record.fields.len(), 400);
    assert_eq!(server.accumulator.len(), 6);
}

#[tokio::test]
async fn test_body_larger_than_limit() {
    let config = WriteListenerConfig {
        max_body_size: 4096,
        ..config()
    };
    let server = TestListener::start(config).await;

    let reply = server.post("/api/v2/write?bucket=mybucket", huge_metric()).await;
    assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(server.accumulator.is_empty());
}

#[tokio::test]
async fn test_bucket_tag_overwrites_existing_tag() {
    let config = WriteListenerConfig {
        bucket_tag: "bucket".to_string(),
        ..config()
    };
    let server = TestListener::start(config).await;

    let reply = server
        .post(
            "/api/v2/write?bucket=mybucket",
            "cpu_load_short,bucket=other,host=server01 value=12.0 1422568543702900257\n",
        )
        .await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let record = server.accumulator.get("cpu_load_short").unwrap();
    assert_eq!(record.tag("bucket"), Some("mybucket"));
    assert_eq!(record.tag("host"), Some("server01"));
}

#[tokio::test]
async fn test_concurrent_writes() {
    let server = Arc::new(TestListener::start(config()).await);
    let mut handles = Vec::new();

    for _ in 0..20 {
        let server = Arc::clone(&server);
        handles.push(tokio::spawn(async move {
            server.post("/api/v2/write?bucket=mybucket", TEST_MSGS).await.status
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::NO_CONTENT);
    }

    assert!(server.accumulator.wait_for(100, Duration::from_secs(5)).await);
    assert_eq!(server.accumulator.len(), 100);
}

#[tokio::test]
async fn test_self_stats() {
    let server = TestListener::start(config()).await;

    server.post("/api/v2/write", TEST_MSG).await;
    server.post("/api/v2/write", TEST_MSGS).await;
    server.get("/ready").await;
    server.get("/health").await;

    assert_eq!(server.stat("writes_served"), 2);
    assert_eq!(server.stat("ready_served"), 1);
    assert_eq!(server.stat("health_served"), 1);
    assert_eq!(server.stat("requests_received"), 4);
    assert_eq!(server.stat("requests_served"), 4);
    assert_eq!(
        server.stat("bytes_received"),
        (TEST_MSG.len() + TEST_MSGS.len()) as i64
    );

    let snapshot = server.registry.snapshot();
    let record = snapshot
        .iter()
        .find(|r| r.name == "internal_write_listener")
        .unwrap();
    assert_eq!(record.field("writes_served"), Some(&FieldValue::Integer(2)));
}

#[tokio::test]
async fn test_acknowledgement_after_stop() {
    let config = WriteListenerConfig {
        max_undelivered_metrics: 10,
        ..config()
    };
    let server = TestListener::start_with(config, CollectingAccumulator::holding(), None).await;

    server.post("/api/v2/write", TEST_MSGS).await;
    let admission = server.listener.admission();
    assert_eq!(admission.pending(), 5);

    server.listener.stop().await;
    assert!(!server.listener.is_running());

    server.accumulator.accept_all();
    assert_eq!(admission.pending(), 0);
    assert_eq!(admission.accepted_total(), 5);
}

#[tokio::test]
async fn test_start_twice_and_bind_failure() {
    let server = TestListener::start(config()).await;
    assert!(matches!(
        server.listener.start().await,
        Err(ListenerError::AlreadyStarted)
    ));

    let taken = WriteListenerConfig {
        service_address: server.addr.to_string(),
        ..config()
    };
    let other = WriteListener::new(
        taken,
        Arc::new(selfstat::Registry::new()),
        Arc::new(CollectingAccumulator::new()),
    );
    assert!(matches!(other.start().await, Err(ListenerError::Bind { .. })));
}

#[tokio::test]
async fn test_stop_closes_listener() {
    let server = TestListener::start(config()).await;
    let addr = server.addr;
    server.listener.stop().await;

    assert!(server.listener.local_addr().is_none());
    let connect = tokio::net::TcpStream::connect(addr).await;
    assert!(connect.is_err());
}
