// Consumer that writes every event to the log

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::Subscription;
use crate::config::ConsumerConfig;
use crate::error::CoreError;
use crate::lifecycle::{Unit, UnitContext, UnitRole};

pub struct LogConsumer {
    address: String,
    received: Arc<AtomicU64>,
    worker: Option<(CancellationToken, JoinHandle<()>)>,
}

impl LogConsumer {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            received: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }

    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self::new(config.address.clone())
    }

    /// Number of events logged so far.
    pub fn received(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.received)
    }
}

#[async_trait]
impl Unit for LogConsumer {
    fn role(&self) -> UnitRole {
        UnitRole::Consumer
    }

    async fn start_listening(&mut self, ctx: &UnitContext) -> Result<(), CoreError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let events = ctx.bus.subscribe(self.address.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            ctx.id.clone(),
            events,
            Arc::clone(&self.received),
            cancel.clone(),
        ));
        self.worker = Some((cancel, task));
        Ok(())
    }

    async fn stop_listening(&mut self, _ctx: &UnitContext) -> Result<(), CoreError> {
        if let Some((cancel, task)) = self.worker.take() {
            cancel.cancel();
            task.await
                .map_err(|e| CoreError::Internal(format!("log consumer task failed: {e}")))?;
        }
        Ok(())
    }
}

async fn run(
    unit: String,
    mut events: Subscription,
    received: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = events.recv() => {
                let Some(msg) = msg else { break };
                received.fetch_add(1, Ordering::Relaxed);
                match msg.payload().as_event() {
                    Some(event) => info!(unit = %unit, address = msg.address(), %event, "event"),
                    None => info!(unit = %unit, address = msg.address(), payload = ?msg.payload(), "message"),
                }
            }
        }
    }
}
