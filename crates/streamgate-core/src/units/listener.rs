// ── Streaming listener ──
//
// Drives one long-poll session per start: authenticate through the auth
// broker, handshake, negotiate advice, subscribe, then issue connect
// requests back to back and route every received event. A stop request
// never interrupts an exchange in flight; the session notices it at the
// next step boundary, drains and closes. Any failure closes the session
// and is logged fatally; a later start builds a fresh session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use streamgate_api::longpoll::decode_event;
use streamgate_api::{CookieCache, LongPollClient, RequestCounter, TransportConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::auth::request_credentials;
use crate::bus::address::{HEADER_FINAL_DESTINATION, dedup_address};
use crate::bus::{Bus, Headers, Payload};
use crate::config::ListenerConfig;
use crate::error::CoreError;
use crate::lifecycle::{Unit, UnitContext, UnitRole};

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(130);
const DEFAULT_STOP_RECHECK: Duration = Duration::from_secs(1);
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a session is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Idle,
    Authenticating,
    Handshaking,
    Advising,
    Subscribing,
    Connected,
    Draining,
    Closed,
}

/// Protocol state of one session; rebuilt on every handshake.
#[derive(Debug, Default)]
pub struct StreamSession {
    pub client_id: Option<String>,
    pub counter: RequestCounter,
    pub cookies: CookieCache,
}

/// Resolved listener settings.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub auth_name: String,
    pub topic: String,
    pub destinations: Vec<String>,
    pub dedup_address: Option<String>,
    pub api_version: String,
    pub address_suffix_field: Option<String>,
    pub transport: TransportConfig,
    pub auth_timeout: Duration,
    pub stop_recheck: Duration,
}

impl ListenerSettings {
    pub fn from_config(config: &ListenerConfig) -> Result<Self, CoreError> {
        let params = &config.unit.parameters;
        Ok(Self {
            auth_name: config.auth_name.clone(),
            topic: config.topic.clone(),
            destinations: config.destinations.clone(),
            dedup_address: config.dedup.as_deref().map(dedup_address),
            api_version: config.api_version.clone(),
            address_suffix_field: config.address_suffix_field.clone(),
            transport: config.unit.transport(DEFAULT_POLL_TIMEOUT)?,
            auth_timeout: params.duration_ms("auth_timeout_ms", DEFAULT_AUTH_TIMEOUT)?,
            stop_recheck: params.positive_duration_ms("stop_recheck_ms", DEFAULT_STOP_RECHECK)?,
        })
    }
}

pub struct StreamingListener {
    settings: Arc<ListenerSettings>,
    phase: Arc<watch::Sender<Phase>>,
    session: Option<(CancellationToken, JoinHandle<()>)>,
}

impl StreamingListener {
    pub fn new(settings: ListenerSettings) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            settings: Arc::new(settings),
            phase: Arc::new(phase),
            session: None,
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Observe phase transitions, e.g. to wait for `Connected`.
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }
}

#[async_trait]
impl Unit for StreamingListener {
    fn role(&self) -> UnitRole {
        UnitRole::Listener
    }

    async fn start_listening(&mut self, ctx: &UnitContext) -> Result<(), CoreError> {
        if let Some((_, task)) = &self.session {
            if !task.is_finished() {
                return Ok(());
            }
        }

        let stop = CancellationToken::new();
        self.phase.send_replace(Phase::Idle);
        let driver = SessionDriver {
            unit: ctx.id.clone(),
            settings: Arc::clone(&self.settings),
            bus: ctx.bus.clone(),
            phase: Arc::clone(&self.phase),
            stop: stop.clone(),
        };
        self.session = Some((stop, tokio::spawn(driver.run())));
        Ok(())
    }

    async fn stop_listening(&mut self, ctx: &UnitContext) -> Result<(), CoreError> {
        let Some((stop, task)) = self.session.take() else {
            return Ok(());
        };
        stop.cancel();
        info!(unit = %ctx.id, phase = %self.phase(), "stop requested");

        while !task.is_finished() {
            debug!(unit = %ctx.id, phase = %self.phase(), "exchange in flight, deferring stop");
            tokio::time::sleep(self.settings.stop_recheck).await;
        }
        task.await
            .map_err(|e| CoreError::Internal(format!("listener session task failed: {e}")))?;
        info!(unit = %ctx.id, "session closed");
        Ok(())
    }
}

// ── Session driver ──────────────────────────────────────────────────

struct SessionDriver {
    unit: String,
    settings: Arc<ListenerSettings>,
    bus: Bus,
    phase: Arc<watch::Sender<Phase>>,
    stop: CancellationToken,
}

impl SessionDriver {
    async fn run(self) {
        match self.drive().await {
            Ok(()) => debug!(unit = %self.unit, "session drained"),
            Err(e) => {
                let phase = *self.phase.borrow();
                error!(fatal = true, unit = %self.unit, %phase, error = %e, "listener halted");
            }
        }
        self.phase.send_replace(Phase::Closed);
    }

    fn enter(&self, phase: Phase) {
        debug!(unit = %self.unit, %phase, "phase change");
        self.phase.send_replace(phase);
    }

    /// Step boundary: true once a stop has been requested.
    fn stopping(&self) -> bool {
        if self.stop.is_cancelled() {
            self.enter(Phase::Draining);
            true
        } else {
            false
        }
    }

    async fn drive(&self) -> Result<(), CoreError> {
        let settings = &self.settings;

        self.enter(Phase::Authenticating);
        let creds =
            request_credentials(&self.bus, &settings.auth_name, false, settings.auth_timeout)
                .await?;
        if self.stopping() {
            return Ok(());
        }
        let client = LongPollClient::new(&creds, &settings.api_version, &settings.transport)?;
        let mut session = StreamSession::default();

        self.enter(Phase::Handshaking);
        let client_id = client.handshake(&mut session.cookies).await?;
        session.client_id = Some(client_id.clone());
        if self.stopping() {
            return Ok(());
        }

        self.enter(Phase::Advising);
        client.advise(&client_id, &mut session.cookies).await?;
        if self.stopping() {
            return Ok(());
        }

        self.enter(Phase::Subscribing);
        client
            .subscribe(&client_id, &settings.topic, &mut session.cookies)
            .await?;

        self.enter(Phase::Connected);
        info!(unit = %self.unit, topic = %settings.topic, "streaming");
        while !self.stopping() {
            let id = session.counter.next_id();
            let batch = client.connect(&client_id, id, &mut session.cookies).await?;
            for envelope in &batch.events {
                self.route(envelope);
            }
        }
        Ok(())
    }

    fn route(&self, envelope: &Value) {
        let Some(event) = decode_event(envelope) else {
            warn!(unit = %self.unit, "event without data.payload skipped");
            return;
        };
        let destinations = self.destinations_for(&event);
        let payload = Payload::event(event);

        match &self.settings.dedup_address {
            Some(gate) => {
                let headers = destinations
                    .iter()
                    .fold(Headers::new(), |h, d| h.with(HEADER_FINAL_DESTINATION, d.as_str()));
                if let Err(e) = self.bus.send(gate, payload, headers) {
                    warn!(unit = %self.unit, error = %e, "dedup gate unavailable, event dropped");
                }
            }
            None => {
                for address in &destinations {
                    if self.bus.publish(address, payload.clone(), Headers::new()) == 0 {
                        debug!(unit = %self.unit, address = %address, "no handlers for event");
                    }
                }
            }
        }
    }

    fn destinations_for(&self, event: &Value) -> Vec<String> {
        let Some(field) = &self.settings.address_suffix_field else {
            return self.settings.destinations.clone();
        };
        match event.get(field).and_then(Value::as_str) {
            Some(suffix) => self
                .settings
                .destinations
                .iter()
                .map(|d| format!("{d}{suffix}"))
                .collect(),
            None => {
                warn!(unit = %self.unit, field = %field, "routing field missing, using base addresses");
                self.settings.destinations.clone()
            }
        }
    }
}
