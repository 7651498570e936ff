// ── Runtime configuration ──
//
// These types describe a pipeline topology at runtime. They never touch
// disk; `streamgate-config` builds them from files and the environment.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use streamgate_api::{ProxyConfig, TransportConfig};
use url::Url;

use crate::error::CoreError;
use crate::lifecycle::UnitRole;

/// Free-form string parameters attached to a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(BTreeMap<String, String>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get_parameter(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn get_parameter_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get_parameter(name).unwrap_or(default)
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Parse a parameter, falling back to `default` when it is absent.
    pub fn parse_parameter<T>(&self, name: &str, default: T) -> Result<T, CoreError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get_parameter(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e| CoreError::Config {
                message: format!("parameter '{name}' = '{raw}': {e}"),
            }),
        }
    }

    /// Read a millisecond parameter as a `Duration`.
    pub fn duration_ms(&self, name: &str, default: Duration) -> Result<Duration, CoreError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse_parameter(name, default_ms)
            .map(Duration::from_millis)
    }

    /// Like [`Parameters::duration_ms`], for periods that must not be zero.
    pub fn positive_duration_ms(
        &self,
        name: &str,
        default: Duration,
    ) -> Result<Duration, CoreError> {
        let period = self.duration_ms(name, default)?;
        if period.is_zero() {
            return Err(CoreError::Config {
                message: format!("parameter '{name}' must be greater than zero"),
            });
        }
        Ok(period)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Settings every unit shares.
#[derive(Debug, Clone)]
pub struct UnitSettings {
    pub name: String,
    /// Implementation tag within the role, e.g. `memory` for a dedup gate.
    pub kind: String,
    pub enabled: bool,
    pub auto_start: bool,
    pub instances: usize,
    pub proxy: Option<ProxyConfig>,
    pub parameters: Parameters,
}

impl UnitSettings {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            enabled: true,
            auto_start: true,
            instances: 1,
            proxy: None,
            parameters: Parameters::new(),
        }
    }

    /// HTTP transport for this unit: its proxy plus a `timeout_secs`
    /// parameter override.
    pub fn transport(&self, default_timeout: Duration) -> Result<TransportConfig, CoreError> {
        let secs = self
            .parameters
            .parse_parameter("timeout_secs", default_timeout.as_secs())?;
        Ok(TransportConfig::default()
            .with_timeout(Duration::from_secs(secs))
            .with_proxy(self.proxy.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub unit: UnitSettings,
    pub server_url: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub token: Option<SecretString>,
}

impl AuthConfig {
    pub fn new(unit: UnitSettings, server_url: impl Into<String>) -> Self {
        Self {
            unit,
            server_url: server_url.into(),
            username: None,
            password: None,
            client_id: None,
            client_secret: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub unit: UnitSettings,
    /// Auth provider the listener logs in through.
    pub auth_name: String,
    pub topic: String,
    pub destinations: Vec<String>,
    /// Dedup gate that screens events before they reach `destinations`.
    pub dedup: Option<String>,
    pub api_version: String,
    /// Payload field whose value is appended to each destination address.
    pub address_suffix_field: Option<String>,
}

impl ListenerConfig {
    pub fn new(
        unit: UnitSettings,
        auth_name: impl Into<String>,
        topic: impl Into<String>,
        destinations: Vec<String>,
    ) -> Self {
        Self {
            unit,
            auth_name: auth_name.into(),
            topic: topic.into(),
            destinations,
            dedup: None,
            api_version: streamgate_api::longpoll::DEFAULT_API_VERSION.into(),
            address_suffix_field: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub unit: UnitSettings,
    /// Bus address the consumer takes events from.
    pub address: String,
    /// Delivery target; required by HTTP consumers.
    pub url: Option<Url>,
    pub auth_name: Option<String>,
}

impl ConsumerConfig {
    pub fn new(unit: UnitSettings, address: impl Into<String>) -> Self {
        Self {
            unit,
            address: address.into(),
            url: None,
            auth_name: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub unit: UnitSettings,
    /// Window size of the in-memory store.
    pub capacity: usize,
    pub redis_url: Option<String>,
    /// Expiry of fingerprints in shared stores.
    pub ttl: Duration,
}

impl DedupConfig {
    pub fn new(unit: UnitSettings) -> Self {
        Self {
            unit,
            capacity: crate::units::dedup::DEFAULT_WINDOW,
            redis_url: None,
            ttl: crate::units::dedup::DEFAULT_TTL,
        }
    }
}

/// One unit definition, tagged by role.
#[derive(Debug, Clone)]
pub enum UnitSpec {
    Auth(AuthConfig),
    Listener(ListenerConfig),
    Consumer(ConsumerConfig),
    Dedup(DedupConfig),
}

impl UnitSpec {
    pub fn settings(&self) -> &UnitSettings {
        match self {
            Self::Auth(c) => &c.unit,
            Self::Listener(c) => &c.unit,
            Self::Consumer(c) => &c.unit,
            Self::Dedup(c) => &c.unit,
        }
    }

    pub fn role(&self) -> UnitRole {
        match self {
            Self::Auth(_) => UnitRole::Auth,
            Self::Listener(_) => UnitRole::Listener,
            Self::Consumer(_) => UnitRole::Consumer,
            Self::Dedup(_) => UnitRole::Dedup,
        }
    }

    /// Registry key, `<role>.<kind>`.
    pub fn tag(&self) -> String {
        format!("{}.{}", self.role(), self.settings().kind)
    }
}

/// The full set of units to run.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub auth: Vec<AuthConfig>,
    pub dedup: Vec<DedupConfig>,
    pub consumers: Vec<ConsumerConfig>,
    pub listeners: Vec<ListenerConfig>,
}

impl Topology {
    /// Units in deploy order: providers first, producers last.
    pub fn deploy_order(&self) -> Vec<UnitSpec> {
        self.auth
            .iter()
            .cloned()
            .map(UnitSpec::Auth)
            .chain(self.dedup.iter().cloned().map(UnitSpec::Dedup))
            .chain(self.consumers.iter().cloned().map(UnitSpec::Consumer))
            .chain(self.listeners.iter().cloned().map(UnitSpec::Listener))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.auth.len() + self.dedup.len() + self.consumers.len() + self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parameter_accessors() {
        let params = Parameters::new()
            .with("max_retry_count", "3")
            .with("content_type", "text/plain");

        assert!(params.has_parameter("content_type"));
        assert!(!params.has_parameter("template"));
        assert_eq!(params.get_parameter("content_type"), Some("text/plain"));
        assert_eq!(params.get_parameter_or("template", "none"), "none");
        assert_eq!(params.parse_parameter("max_retry_count", 10_u32).unwrap(), 3);
        assert_eq!(params.parse_parameter("missing", 10_u32).unwrap(), 10);
    }

    #[test]
    fn unparseable_parameter_is_a_config_error() {
        let params = Parameters::new().with("retry_interval_ms", "soon");
        let err = params
            .duration_ms("retry_interval_ms", Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
        assert!(err.to_string().contains("retry_interval_ms"));
    }

    #[test]
    fn zero_period_is_a_config_error() {
        let params = Parameters::new().with("retry_interval_ms", "0");
        assert_eq!(
            params.duration_ms("retry_interval_ms", Duration::from_secs(1)).unwrap(),
            Duration::ZERO
        );
        let err = params
            .positive_duration_ms("retry_interval_ms", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, CoreError::Config { ref message } if message.contains("greater than zero")));
        assert_eq!(
            Parameters::new()
                .positive_duration_ms("retry_interval_ms", Duration::from_secs(1))
                .unwrap(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn deploy_order_puts_listeners_last() {
        let topology = Topology {
            auth: vec![AuthConfig::new(UnitSettings::new("sf", "basic"), "host")],
            dedup: vec![DedupConfig::new(UnitSettings::new("gate", "memory"))],
            consumers: vec![ConsumerConfig::new(UnitSettings::new("out", "log"), "orders")],
            listeners: vec![ListenerConfig::new(
                UnitSettings::new("in", "longpoll"),
                "sf",
                "/topic/Orders",
                vec!["orders".into()],
            )],
        };
        let tags: Vec<String> = topology.deploy_order().iter().map(UnitSpec::tag).collect();
        assert_eq!(
            tags,
            ["auth.basic", "dedup.memory", "consumer.log", "listener.longpoll"]
        );
    }

    #[test]
    fn transport_uses_proxy_and_timeout_parameter() {
        let mut unit = UnitSettings::new("in", "longpoll");
        unit.proxy = Some(ProxyConfig::new("proxy.corp", 8080));
        unit.parameters.insert("timeout_secs", "5");
        let transport = unit.transport(Duration::from_secs(130)).unwrap();
        assert_eq!(transport.timeout, Duration::from_secs(5));
        assert_eq!(transport.proxy, Some(ProxyConfig::new("proxy.corp", 8080)));
    }
}
