// ── Auth broker ──
//
// One broker per named provider, reachable at `auth:<provider>`. Requests
// are served one at a time, which makes the broker the single writer of
// its cache: at most one login is in flight, and a failed login locks
// further attempts until a request carries the reset header.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use streamgate_api::{BasicLogin, Credentials, PasswordLogin, StaticLogin};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bus::address::{HEADER_RESET_AUTH, auth_address};
use crate::bus::{Bus, BusError, Headers, Message, Payload, Subscription};
use crate::error::CoreError;
use crate::lifecycle::{Unit, UnitContext, UnitRole};

/// Reply code for a login the provider refused.
pub const CODE_AUTH_DENIED: u16 = 401;
/// Reply code while the failure lock is set.
pub const CODE_LOGIN_DISABLED: u16 = 423;

/// Source of credentials for one provider.
#[async_trait]
pub trait LoginProvider: Send + Sync + 'static {
    fn scheme(&self) -> &'static str;

    async fn login(&self) -> Result<Credentials, streamgate_api::Error>;
}

#[async_trait]
impl LoginProvider for BasicLogin {
    fn scheme(&self) -> &'static str {
        "basic"
    }

    async fn login(&self) -> Result<Credentials, streamgate_api::Error> {
        BasicLogin::login(self)
    }
}

#[async_trait]
impl LoginProvider for StaticLogin {
    fn scheme(&self) -> &'static str {
        "static"
    }

    async fn login(&self) -> Result<Credentials, streamgate_api::Error> {
        StaticLogin::login(self)
    }
}

#[async_trait]
impl LoginProvider for PasswordLogin {
    fn scheme(&self) -> &'static str {
        "password"
    }

    async fn login(&self) -> Result<Credentials, streamgate_api::Error> {
        PasswordLogin::login(self).await
    }
}

#[derive(Default)]
struct BrokerState {
    cached: Option<Arc<Credentials>>,
    login_failed: bool,
}

pub struct AuthBroker {
    name: String,
    provider: Arc<dyn LoginProvider>,
    state: Arc<Mutex<BrokerState>>,
    server: Option<(CancellationToken, JoinHandle<()>)>,
}

impl AuthBroker {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LoginProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
            state: Arc::new(Mutex::new(BrokerState::default())),
            server: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Unit for AuthBroker {
    fn role(&self) -> UnitRole {
        UnitRole::Auth
    }

    fn listens_on_deploy(&self) -> bool {
        true
    }

    async fn start_listening(&mut self, ctx: &UnitContext) -> Result<(), CoreError> {
        if self.server.is_some() {
            return Ok(());
        }
        let requests = ctx.bus.subscribe(auth_address(&self.name));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve(
            self.name.clone(),
            Arc::clone(&self.provider),
            Arc::clone(&self.state),
            requests,
            cancel.clone(),
        ));
        self.server = Some((cancel, task));
        info!(provider = %self.name, scheme = self.provider.scheme(), "auth broker ready");
        Ok(())
    }

    async fn stop_listening(&mut self, _ctx: &UnitContext) -> Result<(), CoreError> {
        if let Some((cancel, task)) = self.server.take() {
            cancel.cancel();
            task.await
                .map_err(|e| CoreError::Internal(format!("auth broker task failed: {e}")))?;
        }
        self.state.lock().await.login_failed = false;
        Ok(())
    }
}

async fn serve(
    name: String,
    provider: Arc<dyn LoginProvider>,
    state: Arc<Mutex<BrokerState>>,
    mut requests: Subscription,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = requests.recv() => msg,
        };
        let Some(mut msg) = msg else { break };
        let mut state = state.lock().await;
        answer(&name, provider.as_ref(), &mut state, &mut msg).await;
    }
    debug!(provider = %name, "auth broker stopped serving");
}

async fn answer(
    name: &str,
    provider: &dyn LoginProvider,
    state: &mut BrokerState,
    msg: &mut Message,
) {
    if msg.headers().contains(HEADER_RESET_AUTH) {
        info!(provider = %name, "credential reset requested");
        state.cached = None;
        state.login_failed = false;
    }

    if let Some(creds) = &state.cached {
        msg.reply(Payload::Credentials(Arc::clone(creds)));
        return;
    }
    if state.login_failed {
        msg.fail(CODE_LOGIN_DISABLED, "login disabled after an earlier failure");
        return;
    }

    match provider.login().await {
        Ok(creds) => {
            info!(provider = %name, server = creds.server_identity(), "login succeeded");
            let creds = Arc::new(creds);
            state.cached = Some(Arc::clone(&creds));
            msg.reply(Payload::Credentials(creds));
        }
        Err(e) => {
            state.login_failed = true;
            error!(fatal = true, provider = %name, error = %e, "login failed");
            msg.fail(CODE_AUTH_DENIED, e.to_string());
        }
    }
}

/// Ask the broker for `provider`'s credentials.
pub async fn request_credentials(
    bus: &Bus,
    provider: &str,
    reset: bool,
    timeout: Duration,
) -> Result<Arc<Credentials>, CoreError> {
    let mut headers = Headers::new();
    if reset {
        headers.insert(HEADER_RESET_AUTH, "true");
    }

    let reply = bus
        .request(&auth_address(provider), Payload::Empty, headers, timeout)
        .await
        .map_err(|e| match e {
            BusError::ReplyFailed { code, .. } if code == CODE_LOGIN_DISABLED => {
                CoreError::LoginDisabled {
                    provider: provider.to_owned(),
                }
            }
            BusError::ReplyFailed { message, .. } => CoreError::AuthDenied {
                provider: provider.to_owned(),
                message,
            },
            other => CoreError::Bus(other),
        })?;

    reply
        .payload()
        .as_credentials()
        .cloned()
        .ok_or_else(|| CoreError::Internal("auth broker replied without credentials".into()))
}
