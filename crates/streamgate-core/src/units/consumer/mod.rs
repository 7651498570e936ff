// ── Delivery consumers ──
//
// `DeliveryConsumer` POSTs each event from its bus address to an HTTP
// sink. A failed delivery goes into a retry buffer that is drained on a
// fixed interval; an item that keeps failing is dropped after a maximum
// number of failures with a single fatal log entry.

mod log;
mod retry;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use streamgate_api::{SinkClient, TransportConfig};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

pub use log::LogConsumer;
pub use retry::{RetryBuffer, RetryItem, RetryOutcome};

use super::auth::request_credentials;
use crate::bus::{Bus, Message, Subscription};
use crate::config::ConsumerConfig;
use crate::error::CoreError;
use crate::lifecycle::{Unit, UnitContext, UnitRole};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 10;
pub const DEFAULT_CONTENT_TYPE: &str = "application/json;charset=UTF-8";
const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(60);

/// Turns an event into the body sent to the sink.
pub trait PayloadTransform: Send + Sync + 'static {
    fn transform(&self, event: &Value) -> Result<Bytes, CoreError>;
}

/// Sends the event itself as compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody;

impl PayloadTransform for JsonBody {
    fn transform(&self, event: &Value) -> Result<Bytes, CoreError> {
        serde_json::to_vec(event)
            .map(Bytes::from)
            .map_err(|e| CoreError::Internal(format!("event serialization failed: {e}")))
    }
}

/// Running totals for one consumer.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    pub delivered: AtomicU64,
    pub requeued: AtomicU64,
    pub exhausted: AtomicU64,
}

impl DeliveryStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }
}

/// Resolved delivery settings.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub address: String,
    pub url: Url,
    pub auth_name: Option<String>,
    pub content_type: String,
    pub retry_interval: Duration,
    pub max_retry_count: u32,
    pub transport: TransportConfig,
    pub auth_timeout: Duration,
}

impl DeliverySettings {
    pub fn from_config(config: &ConsumerConfig) -> Result<Self, CoreError> {
        let params = &config.unit.parameters;
        let url = config.url.clone().ok_or_else(|| CoreError::Config {
            message: format!("consumer '{}' needs a url", config.unit.name),
        })?;
        Ok(Self {
            address: config.address.clone(),
            url,
            auth_name: config.auth_name.clone(),
            content_type: params
                .get_parameter_or("content_type", DEFAULT_CONTENT_TYPE)
                .to_owned(),
            retry_interval: params
                .positive_duration_ms("retry_interval_ms", DEFAULT_RETRY_INTERVAL)?,
            max_retry_count: params.parse_parameter("max_retry_count", DEFAULT_MAX_RETRY_COUNT)?,
            transport: config.unit.transport(DEFAULT_SINK_TIMEOUT)?,
            auth_timeout: params.duration_ms("auth_timeout_ms", DEFAULT_AUTH_TIMEOUT)?,
        })
    }
}

pub struct DeliveryConsumer {
    settings: Arc<DeliverySettings>,
    transform: Arc<dyn PayloadTransform>,
    stats: Arc<DeliveryStats>,
    worker: Option<(CancellationToken, JoinHandle<()>)>,
}

impl DeliveryConsumer {
    pub fn new(settings: DeliverySettings) -> Self {
        Self::with_transform(settings, Arc::new(JsonBody))
    }

    pub fn with_transform(settings: DeliverySettings, transform: Arc<dyn PayloadTransform>) -> Self {
        Self {
            settings: Arc::new(settings),
            transform,
            stats: Arc::new(DeliveryStats::default()),
            worker: None,
        }
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl Unit for DeliveryConsumer {
    fn role(&self) -> UnitRole {
        UnitRole::Consumer
    }

    async fn start_listening(&mut self, ctx: &UnitContext) -> Result<(), CoreError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let sink = SinkClient::new(
            self.settings.url.clone(),
            self.settings.content_type.clone(),
            &self.settings.transport,
        )?;
        let events = ctx.bus.subscribe(self.settings.address.clone());
        let cancel = CancellationToken::new();
        let worker = Worker {
            unit: ctx.id.clone(),
            bus: ctx.bus.clone(),
            sink,
            settings: Arc::clone(&self.settings),
            transform: Arc::clone(&self.transform),
            stats: Arc::clone(&self.stats),
        };
        let task = tokio::spawn(worker.run(events, cancel.clone()));
        self.worker = Some((cancel, task));
        info!(unit = %ctx.id, address = %self.settings.address, url = %self.settings.url, "consumer listening");
        Ok(())
    }

    async fn stop_listening(&mut self, _ctx: &UnitContext) -> Result<(), CoreError> {
        if let Some((cancel, task)) = self.worker.take() {
            cancel.cancel();
            task.await
                .map_err(|e| CoreError::Internal(format!("consumer task failed: {e}")))?;
        }
        Ok(())
    }
}

// ── Worker ──────────────────────────────────────────────────────────

struct Worker {
    unit: String,
    bus: Bus,
    sink: SinkClient,
    settings: Arc<DeliverySettings>,
    transform: Arc<dyn PayloadTransform>,
    stats: Arc<DeliveryStats>,
}

impl Worker {
    async fn run(self, mut events: Subscription, cancel: CancellationToken) {
        let mut retries = RetryBuffer::new(self.settings.max_retry_count);
        let mut ticker = tokio::time::interval(self.settings.retry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                msg = events.recv() => {
                    let Some(msg) = msg else { break };
                    self.accept(&msg, &mut retries).await;
                }
                _ = ticker.tick() => self.retry_pending(&mut retries).await,
            }
        }

        if !retries.is_empty() {
            warn!(unit = %self.unit, pending = retries.len(), "consumer stopped with undelivered events");
        }
    }

    async fn accept(&self, msg: &Message, retries: &mut RetryBuffer) {
        let Some(event) = msg.payload().as_event() else {
            warn!(unit = %self.unit, "non-event payload ignored");
            return;
        };
        let body = match self.transform.transform(event) {
            Ok(body) => body,
            Err(e) => {
                error!(fatal = true, unit = %self.unit, error = %e, "event could not be rendered, dropped");
                return;
            }
        };
        if let Err(e) = self.attempt(&body).await {
            self.on_failure(RetryItem::new(body), &e, retries);
        }
    }

    async fn retry_pending(&self, retries: &mut RetryBuffer) {
        for item in retries.drain() {
            if let Err(e) = self.attempt(&item.body).await {
                self.on_failure(item, &e, retries);
            }
        }
    }

    async fn attempt(&self, body: &Bytes) -> Result<(), CoreError> {
        let creds = match &self.settings.auth_name {
            Some(provider) => Some(
                request_credentials(&self.bus, provider, false, self.settings.auth_timeout)
                    .await?,
            ),
            None => None,
        };
        self.sink
            .deliver(body.clone(), creds.as_ref().map(|c| c.authorization()))
            .await?;
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_failure(&self, item: RetryItem, cause: &CoreError, retries: &mut RetryBuffer) {
        match retries.record_failure(item) {
            RetryOutcome::Requeued { failures } => {
                self.stats.requeued.fetch_add(1, Ordering::Relaxed);
                warn!(
                    unit = %self.unit,
                    failures,
                    transient = cause.is_transient(),
                    error = %cause,
                    "delivery failed, queued for retry"
                );
            }
            RetryOutcome::Exhausted(item) => {
                self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                let err = CoreError::DeliveryExhausted {
                    target: self.settings.url.to_string(),
                    attempts: item.failures,
                };
                error!(
                    fatal = true,
                    unit = %self.unit,
                    error = %err,
                    last_error = %cause,
                    first_failure = %item.first_failure,
                    "event dropped"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::UnitSettings;

    fn config() -> ConsumerConfig {
        let mut config = ConsumerConfig::new(UnitSettings::new("out", "http"), "orders");
        config.url = Some(Url::parse("https://sink.example.com/ingest").unwrap());
        config
    }

    #[test]
    fn settings_defaults() {
        let settings = DeliverySettings::from_config(&config()).unwrap();
        assert_eq!(settings.retry_interval, Duration::from_secs(10));
        assert_eq!(settings.max_retry_count, 10);
        assert_eq!(settings.content_type, "application/json;charset=UTF-8");
    }

    #[test]
    fn settings_read_parameters() {
        let mut config = config();
        config.unit.parameters = crate::config::Parameters::new()
            .with("retry_interval_ms", "250")
            .with("max_retry_count", "3")
            .with("content_type", "text/plain");
        let settings = DeliverySettings::from_config(&config).unwrap();
        assert_eq!(settings.retry_interval, Duration::from_millis(250));
        assert_eq!(settings.max_retry_count, 3);
        assert_eq!(settings.content_type, "text/plain");
    }

    #[test]
    fn zero_retry_interval_is_rejected() {
        let mut config = config();
        config.unit.parameters = crate::config::Parameters::new().with("retry_interval_ms", "0");
        assert!(matches!(
            DeliverySettings::from_config(&config),
            Err(CoreError::Config { ref message }) if message.contains("retry_interval_ms")
        ));
    }

    #[test]
    fn http_consumer_requires_url() {
        let mut config = config();
        config.url = None;
        assert!(matches!(
            DeliverySettings::from_config(&config),
            Err(CoreError::Config { .. })
        ));
    }

    #[test]
    fn json_body_is_compact() {
        let body = JsonBody.transform(&json!({ "Id": "1" })).unwrap();
        assert_eq!(body, Bytes::from_static(br#"{"Id":"1"}"#));
    }
}
