//! Shared helpers for write listener integration tests

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use hyper::body::Bytes;
use hyper::{Body, Client, HeaderMap, Method, Request, StatusCode};
use selfstat::Registry;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use torq_write_listener::test_utils::CollectingAccumulator;
use torq_write_listener::{Clock, WriteListener, WriteListenerConfig};

pub const TEST_MSG: &str = "cpu_load_short,host=server01 value=12.0 1422568543702900257\n";

pub const TEST_MSG_NO_NEWLINE: &str = "cpu_load_short,host=server01 value=12.0 1422568543702900257";

pub const TEST_MSGS: &str = "cpu_load_short,host=server02 value=12.0 1422568543702900257
cpu_load_short,host=server03 value=12.0 1422568543702900257
cpu_load_short,host=server04 value=12.0 1422568543702900257
cpu_load_short,host=server05 value=12.0 1422568543702900257
cpu_load_short,host=server06 value=12.0 1422568543702900257
";

pub const TEST_PARTIAL: &str = "cpu,host=a value1=1
cpu,host=b value1=1,value2=+Inf,value3=3
cpu,host=c value1=1";

pub const BAD_MSG: &str = "blahblahblah: 42\n";

pub const TOKEN: &str = "test-token-please-ignore";

/// A single record with a few hundred fields, several KiB long
pub fn huge_metric() -> String {
    let fields: Vec<String> = (0..400).map(|i| format!("field_{}={}i", i, i)).collect();
    format!("super_long_metric,foo=bar {}\n", fields.join(","))
}

pub fn config() -> WriteListenerConfig {
    WriteListenerConfig {
        service_address: "127.0.0.1:0".to_string(),
        ..Default::default()
    }
}

pub struct TestListener {
    pub listener: WriteListener,
    pub addr: SocketAddr,
    pub accumulator: Arc<CollectingAccumulator>,
    pub registry: Arc<Registry>,
}

impl TestListener {
    pub async fn start(config: WriteListenerConfig) -> Self {
        Self::start_with(config, CollectingAccumulator::new(), None).await
    }

    pub async fn start_with(
        config: WriteListenerConfig,
        accumulator: CollectingAccumulator,
        clock: Option<Clock>,
    ) -> Self {
        let accumulator = Arc::new(accumulator);
        let registry = Arc::new(Registry::new());
        let mut listener = WriteListener::new(config, Arc::clone(&registry), accumulator.clone());
        if let Some(clock) = clock {
            listener = listener.with_clock(clock);
        }
        let addr = listener.start().await.expect("listener starts");

        Self {
            listener,
            addr,
            accumulator,
            registry,
        }
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    pub async fn post(&self, path_and_query: &str, body: impl Into<Body>) -> Reply {
        self.send(Method::POST, path_and_query, &[], body.into()).await
    }

    pub async fn get(&self, path: &str) -> Reply {
        self.send(Method::GET, path, &[], Body::empty()).await
    }

    pub async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &[(&str, &str)],
        body: Body,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(self.url(path_and_query));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(body).expect("valid request");

        let response = Client::new().request(request).await.expect("request succeeds");
        let status = response.status();
        let headers = response.headers().clone();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .expect("response body");

        Reply {
            status,
            headers,
            body,
        }
    }

    /// Counter value for this listener's `write_listener` stats
    pub fn stat(&self, field: &str) -> i64 {
        let address = self.listener.config().service_address.clone();
        self.registry
            .get("write_listener", field, &[("address", address.as_str())])
            .map(|stat| stat.get())
            .unwrap_or_default()
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}
