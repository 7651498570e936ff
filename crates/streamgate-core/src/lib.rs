// streamgate-core: bus, lifecycle and pipeline units for streamgate.
//
// Units (auth brokers, streaming listeners, dedup gates, delivery
// consumers) talk to each other only through the in-process `Bus`. The
// `Orchestrator` deploys a `Topology` of them and shuts it down in order.

pub mod bus;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod registry;
pub mod units;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bus::{Bus, BusError, Headers, Message, Payload, Subscription};
pub use config::{
    AuthConfig, ConsumerConfig, DedupConfig, ListenerConfig, Parameters, Topology, UnitSettings,
    UnitSpec,
};
pub use error::CoreError;
pub use lifecycle::{LifecycleState, Unit, UnitContext, UnitHandle, UnitRole};
pub use orchestrator::{Orchestrator, UnitStatus};
pub use registry::{UnitFactory, UnitRegistry};
