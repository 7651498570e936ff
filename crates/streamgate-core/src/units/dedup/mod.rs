// ── Dedup gate ──
//
// Listens on `dedup:<name>`, fingerprints each event and forwards only
// first sightings, headers untouched, to the addresses in its
// final-destination headers.
// Duplicates are dropped quietly; that outcome is expected, not an error.

mod store;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use store::{DEFAULT_TTL, DEFAULT_WINDOW, MembershipStore, MemoryStore, RedisStore};

use crate::bus::address::{HEADER_FINAL_DESTINATION, dedup_address};
use crate::bus::{Bus, Message, Subscription};
use crate::error::CoreError;
use crate::lifecycle::{Unit, UnitContext, UnitRole};

/// What the gate did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First sighting; sent on to this many destinations.
    Forwarded(usize),
    /// Seen before and dropped.
    Suppressed,
    /// No final destination or not an event; dropped.
    Unroutable,
}

/// Hex SHA-256 of the event's serialized form. Object keys serialize in
/// sorted order, so field order in the source does not matter.
pub fn fingerprint(event: &Value) -> String {
    hex::encode(Sha256::digest(event.to_string().as_bytes()))
}

pub struct DedupGate {
    name: String,
    store: Arc<dyn MembershipStore>,
    worker: Option<(CancellationToken, JoinHandle<()>)>,
}

impl DedupGate {
    /// Gates sharing a name should share a store.
    pub fn new(name: impl Into<String>, store: Arc<dyn MembershipStore>) -> Self {
        Self {
            name: name.into(),
            store,
            worker: None,
        }
    }
}

#[async_trait]
impl Unit for DedupGate {
    fn role(&self) -> UnitRole {
        UnitRole::Dedup
    }

    async fn start_listening(&mut self, ctx: &UnitContext) -> Result<(), CoreError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let intake = ctx.bus.subscribe(dedup_address(&self.name));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            ctx.bus.clone(),
            Arc::clone(&self.store),
            intake,
            cancel.clone(),
        ));
        self.worker = Some((cancel, task));
        info!(gate = %self.name, backend = self.store.backend(), "dedup gate listening");
        Ok(())
    }

    async fn stop_listening(&mut self, _ctx: &UnitContext) -> Result<(), CoreError> {
        if let Some((cancel, task)) = self.worker.take() {
            cancel.cancel();
            task.await
                .map_err(|e| CoreError::Internal(format!("dedup task failed: {e}")))?;
        }
        Ok(())
    }
}

async fn run(
    bus: Bus,
    store: Arc<dyn MembershipStore>,
    mut intake: Subscription,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = intake.recv() => {
                let Some(msg) = msg else { break };
                process(&bus, store.as_ref(), &msg).await;
            }
        }
    }
}

/// Screen one message and forward it if it is new.
pub async fn process(bus: &Bus, store: &dyn MembershipStore, msg: &Message) -> DedupOutcome {
    let destinations = msg.headers().get_all(HEADER_FINAL_DESTINATION);
    if destinations.is_empty() {
        error!(fatal = true, address = msg.address(), "event without final destination dropped");
        return DedupOutcome::Unroutable;
    }
    let Some(event) = msg.payload().as_event() else {
        warn!(address = msg.address(), "non-event payload dropped");
        return DedupOutcome::Unroutable;
    };

    let fp = fingerprint(event);
    let fresh = match store.check_and_record(&fp).await {
        Ok(fresh) => fresh,
        Err(e) => {
            warn!(error = %e, backend = store.backend(), "dedup store unavailable, forwarding unchecked");
            true
        }
    };
    if !fresh {
        debug!(fingerprint = %fp, "duplicate suppressed");
        return DedupOutcome::Suppressed;
    }

    let mut forwarded = 0;
    for destination in destinations {
        match bus.send(destination, msg.payload().clone(), msg.headers().clone()) {
            Ok(()) => forwarded += 1,
            Err(e) => warn!(destination = %destination, error = %e, "forward failed"),
        }
    }
    DedupOutcome::Forwarded(forwarded)
}
