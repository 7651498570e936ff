// ── Orchestrator ──
//
// Deploys a topology onto a bus, fires the startup broadcast, and tears
// everything down in dependency order: listeners stop first (so nothing
// new enters the pipeline), then dedup gates and consumers, then auth.

use std::time::Duration;

use futures_util::future::join_all;
use tracing::{error, info, warn};

use crate::bus::address::{HEADER_IS_STARTUP, START, START_ADDRESS, STOP, stop_address};
use crate::bus::{Bus, Headers, Payload};
use crate::config::Topology;
use crate::error::CoreError;
use crate::lifecycle::{self, LifecycleState, UnitContext, UnitHandle, UnitRole};
use crate::registry::UnitRegistry;

/// How long a listener may take to acknowledge a stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(120);

/// Point-in-time view of one deployed unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub id: String,
    pub role: UnitRole,
    pub state: LifecycleState,
}

pub struct Orchestrator {
    bus: Bus,
    registry: UnitRegistry,
    stop_timeout: Duration,
    units: Vec<UnitHandle>,
}

impl Orchestrator {
    pub fn new(registry: UnitRegistry) -> Self {
        Self::with_bus(Bus::new(), registry)
    }

    pub fn with_bus(bus: Bus, registry: UnitRegistry) -> Self {
        Self {
            bus,
            registry,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            units: Vec::new(),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Deploy every enabled unit, then broadcast the startup start.
    pub async fn start(&mut self, topology: &Topology) -> Result<(), CoreError> {
        for spec in topology.deploy_order() {
            let settings = spec.settings();
            if !settings.enabled {
                info!(unit = %settings.name, "unit disabled, skipped");
                continue;
            }

            let units = self.registry.build(&spec)?;
            let count = units.len();
            for (index, unit) in units.into_iter().enumerate() {
                let id = if count == 1 {
                    settings.name.clone()
                } else {
                    format!("{}-{index}", settings.name)
                };
                let ctx = UnitContext {
                    id,
                    bus: self.bus.clone(),
                    auto_start: settings.auto_start,
                };
                let handle = lifecycle::deploy(unit, ctx).await?;
                self.units.push(handle);
            }
        }

        let reached = self.bus.publish(
            START_ADDRESS,
            Payload::control(START),
            Headers::new().with(HEADER_IS_STARTUP, "true"),
        );
        info!(units = self.units.len(), reached, "startup broadcast sent");
        Ok(())
    }

    /// Send a (non-startup) start to every unit.
    pub fn broadcast_start(&self) -> usize {
        self.bus
            .publish(START_ADDRESS, Payload::control(START), Headers::new())
    }

    /// Ask one unit to stop listening and wait for its acknowledgement.
    pub async fn stop_unit(&self, id: &str) -> Result<(), CoreError> {
        self.bus
            .request(
                &stop_address(id),
                Payload::control(STOP),
                Headers::new(),
                self.stop_timeout,
            )
            .await
            .map(|_| ())
            .map_err(|e| CoreError::Lifecycle {
                unit: id.to_owned(),
                message: e.to_string(),
            })
    }

    pub fn units(&self) -> Vec<UnitStatus> {
        self.units
            .iter()
            .map(|h| UnitStatus {
                id: h.id().to_owned(),
                role: h.role(),
                state: h.state(),
            })
            .collect()
    }

    pub fn unit(&self, id: &str) -> Option<&UnitHandle> {
        self.units.iter().find(|h| h.id() == id)
    }

    /// Ordered shutdown. Fails, leaving units deployed, if any listener
    /// does not acknowledge its stop within the stop timeout.
    pub async fn shutdown(&mut self) -> Result<(), CoreError> {
        let listeners: Vec<String> = self
            .units
            .iter()
            .filter(|h| h.role() == UnitRole::Listener && h.is_listening())
            .map(|h| h.id().to_owned())
            .collect();
        info!(listeners = listeners.len(), "stopping listeners");

        let results = join_all(listeners.iter().map(|id| self.stop_unit(id))).await;
        let mut failure = None;
        for result in results {
            if let Err(e) = result {
                error!(error = %e, "listener did not stop");
                failure.get_or_insert(e);
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let units = std::mem::take(&mut self.units);
        let (downstream, rest): (Vec<_>, Vec<_>) = units
            .into_iter()
            .partition(|h| matches!(h.role(), UnitRole::Dedup | UnitRole::Consumer));
        undeploy_all(downstream).await;
        undeploy_all(rest).await;
        info!("shutdown complete");
        Ok(())
    }
}

async fn undeploy_all(handles: Vec<UnitHandle>) {
    for result in join_all(handles.into_iter().map(UnitHandle::undeploy)).await {
        if let Err(e) = result {
            warn!(error = %e, "undeploy failed");
        }
    }
}
