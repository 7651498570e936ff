#![allow(clippy::unwrap_used)]
// Integration tests for the delivery consumer's retry behaviour.

mod support;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use streamgate_api::{SinkClient, StaticLogin, TransportConfig};
use streamgate_core::lifecycle::deploy;
use streamgate_core::units::consumer::DeliverySettings;
use streamgate_core::units::{AuthBroker, DeliveryConsumer, DeliveryStats};
use streamgate_core::{
    Bus, ConsumerConfig, Headers, Parameters, Payload, UnitContext, UnitHandle, UnitSettings,
};

use support::{ChaosResponder, eventually, startup_broadcast};

const INGEST: &str = "/ingest";

fn ctx(bus: &Bus, id: &str) -> UnitContext {
    UnitContext {
        id: id.into(),
        bus: bus.clone(),
        auto_start: true,
    }
}

async fn deploy_consumer(
    bus: &Bus,
    server: &MockServer,
    max_retry_count: u32,
    auth_name: Option<&str>,
) -> (UnitHandle, Arc<DeliveryStats>) {
    let mut unit = UnitSettings::new("out", "http");
    unit.parameters = Parameters::new()
        .with("retry_interval_ms", "50")
        .with("max_retry_count", max_retry_count.to_string());
    let mut config = ConsumerConfig::new(unit, "orders");
    config.url = Some(Url::parse(&format!("{}{INGEST}", server.uri())).unwrap());
    config.auth_name = auth_name.map(str::to_owned);

    let consumer = DeliveryConsumer::new(DeliverySettings::from_config(&config).unwrap());
    let stats = consumer.stats();
    let handle = deploy(Box::new(consumer), ctx(bus, "out")).await.unwrap();
    startup_broadcast(bus);
    eventually(Duration::from_secs(5), || handle.is_listening()).await;
    (handle, stats)
}

fn publish(bus: &Bus, id: &str) {
    assert_eq!(
        bus.publish("orders", Payload::event(json!({ "Id": id })), Headers::new()),
        1
    );
}

async fn sink_requests(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

#[tokio::test]
async fn chaos_responder_fails_one_in_ratio_plus_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ChaosResponder::new(2, ResponseTemplate::new(200)))
        .mount(&server)
        .await;
    let sink = SinkClient::new(
        Url::parse(&server.uri()).unwrap(),
        "text/plain",
        &TransportConfig::default(),
    )
    .unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..6 {
        outcomes.push(sink.deliver(Bytes::from_static(b"x"), None).await.is_ok());
    }
    assert_eq!(outcomes, [true, true, false, true, true, false]);
}

#[tokio::test]
async fn chaos_sink_eventually_receives_everything() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST))
        .respond_with(ChaosResponder::new(1, ResponseTemplate::new(204)))
        .mount(&server)
        .await;

    let bus = Bus::new();
    let (_consumer, stats) = deploy_consumer(&bus, &server, 10, None).await;
    for id in ["a", "b", "c", "d"] {
        publish(&bus, id);
    }

    eventually(Duration::from_secs(5), || stats.delivered() == 4).await;
    assert_eq!(stats.exhausted(), 0);
    assert!(stats.requeued() >= 1);
    assert_eq!(
        sink_requests(&server).await,
        4 + usize::try_from(stats.requeued()).unwrap()
    );
}

#[tokio::test]
async fn event_is_dropped_after_max_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let bus = Bus::new();
    let (_consumer, stats) = deploy_consumer(&bus, &server, 3, None).await;
    publish(&bus, "a");

    eventually(Duration::from_secs(5), || stats.exhausted() == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink_requests(&server).await, 3);
    assert_eq!(stats.requeued(), 2);
    assert_eq!(stats.delivered(), 0);
}

#[tokio::test]
async fn transient_failures_below_the_limit_are_retried_once_each() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(INGEST))
        .and(body_json(json!({ "Id": "a" })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let bus = Bus::new();
    let (_consumer, stats) = deploy_consumer(&bus, &server, 5, None).await;
    publish(&bus, "a");

    eventually(Duration::from_secs(5), || stats.delivered() == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink_requests(&server).await, 3);
    assert_eq!(stats.exhausted(), 0);
}

#[tokio::test]
async fn deliveries_carry_the_provider_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST))
        .and(header("authorization", "Bearer sink-token"))
        .and(header("content-type", "application/json;charset=UTF-8"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let bus = Bus::new();
    let login = StaticLogin::new(server.uri(), SecretString::from("Bearer sink-token".to_owned()));
    let broker = AuthBroker::new("sink", Arc::new(login));
    let _auth = deploy(Box::new(broker), ctx(&bus, "sink")).await.unwrap();
    let (_consumer, stats) = deploy_consumer(&bus, &server, 3, Some("sink")).await;
    publish(&bus, "a");

    eventually(Duration::from_secs(5), || stats.delivered() == 1).await;
}

#[tokio::test]
async fn stopped_consumer_takes_no_more_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let bus = Bus::new();
    let (consumer, stats) = deploy_consumer(&bus, &server, 3, None).await;
    consumer.undeploy().await.unwrap();

    assert_eq!(
        bus.publish("orders", Payload::event(json!({ "Id": "late" })), Headers::new()),
        0
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stats.delivered(), 0);
    assert_eq!(sink_requests(&server).await, 0);
}
