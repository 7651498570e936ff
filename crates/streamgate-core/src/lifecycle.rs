// ── Unit lifecycle ──
//
// Every unit runs inside a runner task that owns its control-plane
// subscriptions: the shared start broadcast and the unit's own stop
// address. The runner serializes start, stop and undeploy so the unit
// itself never sees two lifecycle calls at once.

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::address::{HEADER_IS_STARTUP, START, START_ADDRESS, STOP, stop_address};
use crate::bus::{Bus, Message, Payload, Subscription};
use crate::error::CoreError;

/// Failure code replied to a stop request the unit could not honor.
pub const CODE_STOP_FAILED: u16 = 500;
/// Failure code replied to an unrecognized control payload.
pub const CODE_UNKNOWN_COMMAND: u16 = 400;

/// What a unit does in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum UnitRole {
    Auth,
    Listener,
    Dedup,
    Consumer,
}

/// Lifecycle flags of one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleState {
    pub listening: bool,
    pub shutting_down: bool,
    pub shutdown_completed: bool,
    pub startup_completed: bool,
}

impl LifecycleState {
    /// Decide whether a start command should bring the unit up.
    ///
    /// The first start ever seen consults `auto_start`; every later one
    /// starts unconditionally. Nothing starts once shutdown has begun.
    pub fn accept_start(&mut self, command: &str, auto_start: bool) -> bool {
        if command != START || self.shutting_down {
            return false;
        }
        if self.startup_completed {
            return true;
        }
        self.startup_completed = true;
        auto_start
    }
}

/// Per-unit runtime context handed to every lifecycle call.
#[derive(Clone)]
pub struct UnitContext {
    pub id: String,
    pub bus: Bus,
    pub auto_start: bool,
}

/// A pipeline stage with start/stop semantics.
#[async_trait]
pub trait Unit: Send + 'static {
    fn role(&self) -> UnitRole;

    /// Start listening right after deploy instead of waiting for a start
    /// broadcast. Used by units others depend on during startup.
    fn listens_on_deploy(&self) -> bool {
        false
    }

    async fn start_listening(&mut self, ctx: &UnitContext) -> Result<(), CoreError>;

    async fn stop_listening(&mut self, ctx: &UnitContext) -> Result<(), CoreError>;
}

// ── Handle ──────────────────────────────────────────────────────────

/// Owner-side handle of a deployed unit.
pub struct UnitHandle {
    id: String,
    role: UnitRole,
    state: watch::Receiver<LifecycleState>,
    undeploy: CancellationToken,
    task: JoinHandle<()>,
}

impl UnitHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> UnitRole {
        self.role
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn is_listening(&self) -> bool {
        self.state.borrow().listening
    }

    /// Receiver for observing state changes.
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.clone()
    }

    /// Stop the unit (if listening) and wait for its runner to exit.
    pub async fn undeploy(self) -> Result<(), CoreError> {
        let Self {
            id, undeploy, task, ..
        } = self;
        undeploy.cancel();
        task.await
            .map_err(|e| CoreError::Internal(format!("unit '{id}' runner failed: {e}")))
    }
}

/// Deploy a unit: register its control-plane handlers, run it, and
/// return once it is ready to receive start commands.
pub async fn deploy(unit: Box<dyn Unit>, ctx: UnitContext) -> Result<UnitHandle, CoreError> {
    let role = unit.role();
    let start = ctx.bus.subscribe(START_ADDRESS);
    let stop = ctx.bus.subscribe(stop_address(&ctx.id));
    let (state_tx, state_rx) = watch::channel(LifecycleState::default());
    let undeploy = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();

    let id = ctx.id.clone();
    let runner = Runner {
        unit,
        role,
        ctx,
        state: state_tx,
        start,
        stop,
        undeploy: undeploy.clone(),
    };
    let task = tokio::spawn(runner.run(ready_tx));

    ready_rx.await.map_err(|_| CoreError::Lifecycle {
        unit: id.clone(),
        message: "runner exited before becoming ready".into(),
    })??;

    Ok(UnitHandle {
        id,
        role,
        state: state_rx,
        undeploy,
        task,
    })
}

// ── Runner ──────────────────────────────────────────────────────────

struct Runner {
    unit: Box<dyn Unit>,
    role: UnitRole,
    ctx: UnitContext,
    state: watch::Sender<LifecycleState>,
    start: Subscription,
    stop: Subscription,
    undeploy: CancellationToken,
}

impl Runner {
    async fn run(mut self, ready: oneshot::Sender<Result<(), CoreError>>) {
        if self.unit.listens_on_deploy() {
            if let Err(e) = self.unit.start_listening(&self.ctx).await {
                let _ = ready.send(Err(e));
                return;
            }
            self.state.send_modify(|s| s.listening = true);
        }
        let _ = ready.send(Ok(()));
        info!(unit = %self.ctx.id, role = %self.role, "unit deployed");

        loop {
            tokio::select! {
                biased;
                () = self.undeploy.cancelled() => break,
                Some(msg) = self.stop.recv() => self.handle_stop(msg).await,
                Some(msg) = self.start.recv() => self.handle_start(&msg).await,
            }
        }

        self.shutdown().await;
    }

    async fn handle_start(&mut self, msg: &Message) {
        let command = msg.payload().as_control().unwrap_or_default();
        let during_startup = msg.headers().contains(HEADER_IS_STARTUP);
        let auto_start = self.ctx.auto_start;

        let mut accepted = false;
        self.state
            .send_modify(|s| accepted = s.accept_start(command, auto_start));
        if !accepted {
            debug!(unit = %self.ctx.id, during_startup, "start not applicable");
            return;
        }
        if self.state.borrow().listening {
            debug!(unit = %self.ctx.id, "already listening");
            return;
        }

        match self.unit.start_listening(&self.ctx).await {
            Ok(()) => {
                self.state.send_modify(|s| s.listening = true);
                info!(unit = %self.ctx.id, during_startup, "listening");
            }
            Err(e) => error!(fatal = true, unit = %self.ctx.id, error = %e, "start failed"),
        }
    }

    async fn handle_stop(&mut self, mut msg: Message) {
        if msg.payload().as_control() != Some(STOP) {
            msg.fail(CODE_UNKNOWN_COMMAND, "expected a stop command");
            return;
        }
        if !self.state.borrow().listening {
            msg.reply(Payload::control(STOP));
            return;
        }

        match self.unit.stop_listening(&self.ctx).await {
            Ok(()) => {
                self.state.send_modify(|s| s.listening = false);
                info!(unit = %self.ctx.id, "stopped listening");
                msg.reply(Payload::control(STOP));
            }
            Err(e) => {
                error!(unit = %self.ctx.id, error = %e, "stop failed");
                msg.fail(CODE_STOP_FAILED, e.to_string());
            }
        }
    }

    async fn shutdown(mut self) {
        self.state.send_modify(|s| s.shutting_down = true);
        if self.state.borrow().listening {
            if let Err(e) = self.unit.stop_listening(&self.ctx).await {
                warn!(unit = %self.ctx.id, error = %e, "stop during undeploy failed");
            }
        }
        self.state.send_modify(|s| {
            s.listening = false;
            s.shutdown_completed = true;
        });
        info!(unit = %self.ctx.id, "unit undeployed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::bus::Headers;

    // ── Start decision ──────────────────────────────────────────────

    #[test]
    fn first_start_honors_auto_start() {
        let mut state = LifecycleState::default();
        assert!(!state.accept_start(START, false));
        assert!(state.startup_completed);
        assert!(state.accept_start(START, false));

        let mut state = LifecycleState::default();
        assert!(state.accept_start(START, true));
    }

    #[test]
    fn unknown_commands_do_not_count_as_first_start() {
        let mut state = LifecycleState::default();
        assert!(!state.accept_start("reload", true));
        assert!(!state.startup_completed);
    }

    #[test]
    fn nothing_starts_while_shutting_down() {
        let mut state = LifecycleState {
            startup_completed: true,
            shutting_down: true,
            ..LifecycleState::default()
        };
        assert!(!state.accept_start(START, true));
    }

    // ── Runner ──────────────────────────────────────────────────────

    #[derive(Default)]
    struct Calls {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    struct Probe(Arc<Calls>);

    #[async_trait]
    impl Unit for Probe {
        fn role(&self) -> UnitRole {
            UnitRole::Consumer
        }

        async fn start_listening(&mut self, _ctx: &UnitContext) -> Result<(), CoreError> {
            self.0.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop_listening(&mut self, _ctx: &UnitContext) -> Result<(), CoreError> {
            self.0.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn deploy_probe(bus: &Bus, auto_start: bool) -> (UnitHandle, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let ctx = UnitContext {
            id: "probe".into(),
            bus: bus.clone(),
            auto_start,
        };
        let handle = deploy(Box::new(Probe(Arc::clone(&calls))), ctx).await.unwrap();
        (handle, calls)
    }

    async fn broadcast_start(bus: &Bus, handle: &UnitHandle, startup: bool) {
        let mut headers = Headers::new();
        if startup {
            headers.insert(HEADER_IS_STARTUP, "true");
        }
        let mut rx = handle.watch_state();
        rx.mark_unchanged();
        bus.publish(START_ADDRESS, Payload::control(START), headers);
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
    }

    async fn request_stop(bus: &Bus) {
        bus.request(
            &stop_address("probe"),
            Payload::control(STOP),
            Headers::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn auto_start_off_skips_only_the_startup_broadcast() {
        let bus = Bus::new();
        let (handle, calls) = deploy_probe(&bus, false).await;

        broadcast_start(&bus, &handle, true).await;
        assert!(!handle.is_listening());

        broadcast_start(&bus, &handle, false).await;
        tokio::time::timeout(Duration::from_secs(1), handle.watch_state().wait_for(|s| s.listening))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(calls.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listening_follows_last_start_or_stop() {
        let bus = Bus::new();
        let (handle, calls) = deploy_probe(&bus, true).await;

        broadcast_start(&bus, &handle, true).await;
        handle.watch_state().wait_for(|s| s.listening).await.unwrap();

        request_stop(&bus).await;
        assert!(!handle.is_listening());

        // A stop while already stopped is acknowledged without calling the unit.
        request_stop(&bus).await;
        assert_eq!(calls.stops.load(Ordering::SeqCst), 1);

        broadcast_start(&bus, &handle, false).await;
        handle.watch_state().wait_for(|s| s.listening).await.unwrap();
        assert_eq!(calls.starts.load(Ordering::SeqCst), 2);

        handle.undeploy().await.unwrap();
        assert_eq!(calls.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn undeploy_marks_shutdown_completed() {
        let bus = Bus::new();
        let (handle, _calls) = deploy_probe(&bus, true).await;
        let rx = handle.watch_state();
        handle.undeploy().await.unwrap();

        let state = *rx.borrow();
        assert!(state.shutting_down);
        assert!(state.shutdown_completed);
        assert!(!state.listening);
        assert_eq!(bus.handler_count(START_ADDRESS), 0);
    }
}
