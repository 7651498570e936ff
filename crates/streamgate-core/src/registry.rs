// ── Unit registry ──
//
// Maps `<role>.<kind>` tags to factories. A factory returns every
// instance a spec asks for, so instances of one unit can share state
// (a dedup store, for example).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use streamgate_api::{BasicLogin, PasswordLogin, StaticLogin};

use crate::config::{AuthConfig, DedupConfig, UnitSpec};
use crate::error::CoreError;
use crate::lifecycle::Unit;
use crate::units::consumer::DeliverySettings;
use crate::units::dedup::{DedupGate, MembershipStore, MemoryStore, RedisStore};
use crate::units::listener::ListenerSettings;
use crate::units::{AuthBroker, DeliveryConsumer, LogConsumer, LoginProvider, StreamingListener};

pub type UnitFactory =
    Arc<dyn Fn(&UnitSpec) -> Result<Vec<Box<dyn Unit>>, CoreError> + Send + Sync>;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Default)]
pub struct UnitRegistry {
    factories: HashMap<String, UnitFactory>,
}

impl fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl UnitRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in unit kind.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("auth.basic", basic_auth);
        registry.register("auth.password", password_auth);
        registry.register("auth.static", static_auth);
        registry.register("listener.longpoll", longpoll_listener);
        registry.register("consumer.http", http_consumer);
        registry.register("consumer.log", log_consumer);
        registry.register("dedup.memory", memory_dedup);
        registry.register("dedup.redis", redis_dedup);
        registry
    }

    /// Add or replace the factory for `tag`.
    pub fn register<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&UnitSpec) -> Result<Vec<Box<dyn Unit>>, CoreError> + Send + Sync + 'static,
    {
        self.factories.insert(tag.into(), Arc::new(factory));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build all instances for `spec`.
    pub fn build(&self, spec: &UnitSpec) -> Result<Vec<Box<dyn Unit>>, CoreError> {
        let tag = spec.tag();
        let factory = self
            .factories
            .get(&tag)
            .ok_or(CoreError::UnknownUnitKind { kind: tag })?;
        factory(spec)
    }
}

// ── Built-in factories ──────────────────────────────────────────────

fn mismatch(spec: &UnitSpec) -> CoreError {
    CoreError::Internal(format!("factory called with a {} spec", spec.role()))
}

fn required<T: Clone>(value: Option<&T>, unit: &str, field: &str) -> Result<T, CoreError> {
    value.cloned().ok_or_else(|| CoreError::Config {
        message: format!("unit '{unit}' is missing '{field}'"),
    })
}

fn broker(config: &AuthConfig, provider: Arc<dyn LoginProvider>) -> Vec<Box<dyn Unit>> {
    vec![Box::new(AuthBroker::new(config.unit.name.clone(), provider))]
}

fn basic_auth(spec: &UnitSpec) -> Result<Vec<Box<dyn Unit>>, CoreError> {
    let UnitSpec::Auth(config) = spec else {
        return Err(mismatch(spec));
    };
    let name = &config.unit.name;
    let login = BasicLogin::new(
        config.server_url.clone(),
        required(config.username.as_ref(), name, "username")?,
        required(config.password.as_ref(), name, "password")?,
    );
    Ok(broker(config, Arc::new(login)))
}

fn password_auth(spec: &UnitSpec) -> Result<Vec<Box<dyn Unit>>, CoreError> {
    let UnitSpec::Auth(config) = spec else {
        return Err(mismatch(spec));
    };
    let name = &config.unit.name;
    let login = PasswordLogin::new(
        &config.server_url,
        required(config.client_id.as_ref(), name, "client_id")?,
        required(config.client_secret.as_ref(), name, "client_secret")?,
        required(config.username.as_ref(), name, "username")?,
        required(config.password.as_ref(), name, "password")?,
        &config.unit.transport(LOGIN_TIMEOUT)?,
    )?;
    Ok(broker(config, Arc::new(login)))
}

fn static_auth(spec: &UnitSpec) -> Result<Vec<Box<dyn Unit>>, CoreError> {
    let UnitSpec::Auth(config) = spec else {
        return Err(mismatch(spec));
    };
    let login = StaticLogin::new(
        config.server_url.clone(),
        required(config.token.as_ref(), &config.unit.name, "token")?,
    );
    Ok(broker(config, Arc::new(login)))
}

fn longpoll_listener(spec: &UnitSpec) -> Result<Vec<Box<dyn Unit>>, CoreError> {
    let UnitSpec::Listener(config) = spec else {
        return Err(mismatch(spec));
    };
    let settings = ListenerSettings::from_config(config)?;
    Ok(vec![Box::new(StreamingListener::new(settings))])
}

fn http_consumer(spec: &UnitSpec) -> Result<Vec<Box<dyn Unit>>, CoreError> {
    let UnitSpec::Consumer(config) = spec else {
        return Err(mismatch(spec));
    };
    let settings = DeliverySettings::from_config(config)?;
    Ok((0..config.unit.instances.max(1))
        .map(|_| Box::new(DeliveryConsumer::new(settings.clone())) as Box<dyn Unit>)
        .collect())
}

fn log_consumer(spec: &UnitSpec) -> Result<Vec<Box<dyn Unit>>, CoreError> {
    let UnitSpec::Consumer(config) = spec else {
        return Err(mismatch(spec));
    };
    Ok((0..config.unit.instances.max(1))
        .map(|_| Box::new(LogConsumer::from_config(config)) as Box<dyn Unit>)
        .collect())
}

fn gates(config: &DedupConfig, store: &Arc<dyn MembershipStore>) -> Vec<Box<dyn Unit>> {
    (0..config.unit.instances.max(1))
        .map(|_| {
            Box::new(DedupGate::new(config.unit.name.clone(), Arc::clone(store))) as Box<dyn Unit>
        })
        .collect()
}

fn memory_dedup(spec: &UnitSpec) -> Result<Vec<Box<dyn Unit>>, CoreError> {
    let UnitSpec::Dedup(config) = spec else {
        return Err(mismatch(spec));
    };
    let store: Arc<dyn MembershipStore> = Arc::new(MemoryStore::new(config.capacity));
    Ok(gates(config, &store))
}

fn redis_dedup(spec: &UnitSpec) -> Result<Vec<Box<dyn Unit>>, CoreError> {
    let UnitSpec::Dedup(config) = spec else {
        return Err(mismatch(spec));
    };
    let url = required(config.redis_url.as_ref(), &config.unit.name, "redis_url")?;
    let prefix = format!("streamgate:{}:", config.unit.name);
    let store: Arc<dyn MembershipStore> = Arc::new(RedisStore::open(&url, config.ttl, prefix)?);
    Ok(gates(config, &store))
}
