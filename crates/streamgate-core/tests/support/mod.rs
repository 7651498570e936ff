// Shared fixtures for streamgate-core integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use streamgate_core::bus::address::{HEADER_IS_STARTUP, START, START_ADDRESS};
use streamgate_core::{Bus, Headers, Payload};

pub const HANDSHAKE: &str = "/cometd/41.0/handshake";
pub const CONNECT: &str = "/cometd/41.0/connect";
pub const SUBSCRIBE: &str = "/cometd/41.0/subscribe";

// ── Failure injection ───────────────────────────────────────────────

/// Answers with `ok`, except that one request in every `ratio + 1`
/// gets a 500. Ratio 0 never fails.
pub struct ChaosResponder {
    ratio: usize,
    seen: AtomicUsize,
    ok: ResponseTemplate,
}

impl ChaosResponder {
    pub fn new(ratio: usize, ok: ResponseTemplate) -> Self {
        Self {
            ratio,
            seen: AtomicUsize::new(0),
            ok,
        }
    }
}

impl Respond for ChaosResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.seen.fetch_add(1, Ordering::SeqCst);
        if self.ratio > 0 && n % (self.ratio + 1) == self.ratio {
            ResponseTemplate::new(500).set_body_string("chaos")
        } else {
            self.ok.clone()
        }
    }
}

// ── Streaming server ────────────────────────────────────────────────

pub fn event(id: &str) -> Value {
    json!({
        "channel": "/topic/Orders",
        "data": { "event": { "replayId": 1 }, "payload": { "Id": id } }
    })
}

pub fn connect_ok() -> Value {
    json!({ "channel": "/meta/connect", "successful": true })
}

/// Mount handshake, advice and subscribe replies that succeed.
pub async fn mount_session_setup(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(HANDSHAKE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "channel": "/meta/handshake",
            "successful": true,
            "clientId": "client-1"
        }])))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(CONNECT))
        .and(body_partial_json(json!([{ "id": "2" }])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "channel": "/meta/connect",
            "successful": true,
            "advice": { "timeout": 110_000, "reconnect": "retry" }
        }])))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(SUBSCRIBE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "channel": "/meta/subscribe",
            "successful": true
        }])))
        .mount(server)
        .await;
}

/// First connect (id 3) returns `events`; later connects return no
/// events after `poll_delay`.
pub async fn mount_connects(server: &MockServer, events: Vec<Value>, poll_delay: Duration) {
    let mut first = events;
    first.push(connect_ok());
    Mock::given(method("POST"))
        .and(path(CONNECT))
        .and(body_partial_json(json!([{ "id": "3" }])))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(first)))
        .up_to_n_times(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(CONNECT))
        .and(body_partial_json(json!([{ "channel": "/meta/connect" }])))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([connect_ok()]))
                .set_delay(poll_delay),
        )
        .mount(server)
        .await;
}

/// Connect request ids the server has seen so far, in arrival order.
pub async fn connect_ids(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == CONNECT)
        .filter_map(|r| r.body_json::<Value>().ok())
        .filter_map(|body| body[0]["id"].as_str().map(str::to_owned))
        .filter(|id| id != "2")
        .collect()
}

pub async fn requests_to(server: &MockServer, endpoint: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == endpoint)
        .count()
}

// ── Misc ────────────────────────────────────────────────────────────

pub fn startup_broadcast(bus: &Bus) -> usize {
    bus.publish(
        START_ADDRESS,
        Payload::control(START),
        Headers::new().with(HEADER_IS_STARTUP, "true"),
    )
}

/// Poll `check` until it returns true or `limit` passes.
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) {
    tokio::time::timeout(limit, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Like [`eventually`], for checks that have to query a server.
pub async fn eventually_async<F, Fut>(limit: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(limit, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
