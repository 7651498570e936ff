//! `run` and `check` command handlers.

use std::fmt::Write as _;
use std::path::Path;

use tracing::{info, warn};

use streamgate_config::{Config, load_config};
use streamgate_core::{Orchestrator, Topology, UnitRegistry, UnitSpec};

use crate::cli::RunArgs;
use crate::error::CliError;

/// Load, validate, and build every unit once without deploying anything.
fn prepare(path: &Path) -> Result<(Config, Topology, UnitRegistry), CliError> {
    let config = load_config(path)?;
    let topology = config.to_topology()?;
    if topology.is_empty() {
        return Err(CliError::EmptyTopology);
    }

    let registry = UnitRegistry::builtin();
    for spec in topology.deploy_order() {
        registry
            .build(&spec)
            .map_err(|source| CliError::InvalidUnit {
                unit: spec.settings().name.clone(),
                source,
            })?;
    }
    Ok((config, topology, registry))
}

pub fn check(path: &Path) -> Result<(), CliError> {
    let (_, topology, _) = prepare(path)?;
    print!("{}", render_topology(&topology));
    Ok(())
}

pub async fn run(args: &RunArgs, path: &Path) -> Result<(), CliError> {
    let (config, topology, registry) = prepare(path)?;
    let stop_timeout = args
        .stop_timeout
        .unwrap_or_else(|| config.runtime.stop_timeout());

    let mut orchestrator = Orchestrator::new(registry).with_stop_timeout(stop_timeout);
    if let Err(e) = orchestrator.start(&topology).await {
        if let Err(cleanup) = orchestrator.shutdown().await {
            warn!(error = %cleanup, "cleanup after failed start was incomplete");
        }
        return Err(CliError::Startup(e));
    }
    info!(units = orchestrator.units().len(), "pipeline running");

    shutdown_signal().await?;
    info!("shutdown requested");
    orchestrator.shutdown().await.map_err(CliError::Shutdown)
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<(), CliError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<(), CliError> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

// ── Rendering ───────────────────────────────────────────────────────

/// One line per unit, in deploy order.
pub fn render_topology(topology: &Topology) -> String {
    let mut out = String::new();
    for spec in topology.deploy_order() {
        let unit = spec.settings();
        let mut detail = match &spec {
            UnitSpec::Auth(c) => format!("server={}", c.server_url),
            UnitSpec::Dedup(c) if unit.kind == "redis" => {
                format!("ttl={}s", c.ttl.as_secs())
            }
            UnitSpec::Dedup(c) => format!("window={}", c.capacity),
            UnitSpec::Consumer(c) => {
                let target = c.url.as_ref().map_or("log", |u| u.as_str());
                format!("{} -> {target}", c.address)
            }
            UnitSpec::Listener(c) => {
                let via = c.dedup.as_deref().map(|g| format!(" via {g}")).unwrap_or_default();
                format!("{}{via} -> {}", c.topic, c.destinations.join(","))
            }
        };
        if unit.instances > 1 && !matches!(spec, UnitSpec::Listener(_)) {
            let _ = write!(detail, " x{}", unit.instances);
        }
        if !unit.enabled {
            detail.push_str(" (disabled)");
        }
        let role = spec.role().to_string();
        let _ = writeln!(out, "{role:<9}{:<14}{:<10}{detail}", unit.name, unit.kind);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use streamgate_core::{AuthConfig, ConsumerConfig, DedupConfig, ListenerConfig, UnitSettings};

    use super::*;

    #[test]
    fn renders_units_in_deploy_order() {
        let mut gate = UnitSettings::new("gate", "memory");
        gate.instances = 2;
        let mut console = UnitSettings::new("console", "log");
        console.enabled = false;
        let mut listener = ListenerConfig::new(
            UnitSettings::new("orders-in", "longpoll"),
            "sf",
            "/topic/Orders",
            vec!["orders".into(), "audit".into()],
        );
        listener.dedup = Some("gate".into());

        let topology = Topology {
            auth: vec![AuthConfig::new(
                UnitSettings::new("sf", "static"),
                "login.example.com",
            )],
            dedup: vec![DedupConfig::new(gate)],
            consumers: vec![ConsumerConfig::new(console, "orders")],
            listeners: vec![listener],
        };

        insta::assert_snapshot!(render_topology(&topology).trim_end(), @r"
        auth     sf            static    server=login.example.com
        dedup    gate          memory    window=100 x2
        consumer console       log       orders -> log (disabled)
        listener orders-in     longpoll  /topic/Orders via gate -> orders,audit
        ");
    }
}
