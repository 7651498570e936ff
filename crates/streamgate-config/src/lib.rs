//! Topology configuration for streamgate.
//!
//! Reads `streamgate.toml` (one array of tables per unit role), overlays
//! `STREAMGATE_*` environment variables, resolves auth secrets and
//! checks cross-references before translating everything into a
//! `streamgate_core::Topology`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use streamgate_api::ProxyConfig;
use streamgate_api::longpoll::DEFAULT_API_VERSION;
use streamgate_core::{
    AuthConfig, ConsumerConfig, DedupConfig, ListenerConfig, Parameters, Topology, UnitSettings,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no {secret} configured for auth provider '{provider}'")]
    MissingSecret { provider: String, secret: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level `streamgate.toml`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeSection,

    /// Proxy inherited by every unit that does not set its own.
    pub proxy: Option<ProxySection>,

    #[serde(default)]
    pub auth: Vec<AuthSection>,

    #[serde(default)]
    pub dedup: Vec<DedupSection>,

    #[serde(default)]
    pub consumer: Vec<ConsumerSection>,

    #[serde(default)]
    pub listener: Vec<ListenerSection>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RuntimeSection {
    /// How long shutdown waits for each listener to acknowledge its stop.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

impl RuntimeSection {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

fn default_stop_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxySection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// A parameter value as written in TOML. Units only ever see strings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Flag(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Fields shared by every unit section.
#[derive(Debug, Deserialize, Serialize)]
pub struct UnitSection {
    pub name: String,

    /// Implementation within the role. Listeners default to `longpoll`,
    /// consumers to `http`, dedup gates to `memory`.
    pub kind: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub auto_start: bool,

    #[serde(default = "default_instances")]
    pub instances: usize,

    pub proxy: Option<ProxySection>,

    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
}

fn default_true() -> bool {
    true
}
fn default_instances() -> usize {
    1
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthSection {
    #[serde(flatten)]
    pub unit: UnitSection,

    /// Server the provider logs in to (a bare host means HTTPS).
    pub server_url: String,

    pub username: Option<String>,

    /// Plaintext password (prefer `<NAME>_PASSWORD`).
    pub password: Option<String>,

    pub client_id: Option<String>,

    /// Plaintext OAuth client secret (prefer `<NAME>_CLIENT_SECRET`).
    pub client_secret: Option<String>,

    /// Plaintext pre-issued token (prefer `<NAME>_TOKEN`).
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DedupSection {
    #[serde(flatten)]
    pub unit: UnitSection,

    #[serde(default = "default_capacity")]
    pub capacity: usize,

    pub redis_url: Option<String>,

    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

fn default_capacity() -> usize {
    streamgate_core::units::dedup::DEFAULT_WINDOW
}
fn default_ttl() -> u64 {
    streamgate_core::units::dedup::DEFAULT_TTL.as_secs()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConsumerSection {
    #[serde(flatten)]
    pub unit: UnitSection,

    /// Bus address to take events from.
    pub address: String,

    pub url: Option<String>,

    pub auth_name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ListenerSection {
    #[serde(flatten)]
    pub unit: UnitSection,

    pub auth_name: String,

    pub topic: String,

    #[serde(default)]
    pub destinations: Vec<String>,

    pub dedup: Option<String>,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    pub address_suffix_field: Option<String>,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "streamgate", "streamgate").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("streamgate.toml");
            p
        },
        |dirs| dirs.config_dir().join("streamgate.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("streamgate");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load `path`, then overlay `STREAMGATE_*` variables (`__` separates
/// nested keys, e.g. `STREAMGATE_PROXY__HOST`).
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("STREAMGATE_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Secret resolution ───────────────────────────────────────────────

/// Environment variable consulted for one of a provider's secrets:
/// `sf-prod` + `PASSWORD` → `SF_PROD_PASSWORD`.
pub fn secret_env_name(provider: &str, secret: &str) -> String {
    let stem: String = provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}_{secret}")
}

fn resolve_secret(
    provider: &str,
    secret: &str,
    plaintext: Option<&String>,
    env: &impl Fn(&str) -> Option<String>,
) -> Option<SecretString> {
    // 1. Environment
    if let Some(value) = env(&secret_env_name(provider, secret)) {
        return Some(SecretString::from(value));
    }
    // 2. Plaintext in config
    plaintext.map(|v| SecretString::from(v.clone()))
}

// ── Translation to runtime types ────────────────────────────────────

impl Config {
    /// Validate and translate into a runtime topology, reading secrets
    /// from the process environment.
    pub fn to_topology(&self) -> Result<Topology, ConfigError> {
        self.to_topology_with(|name| std::env::var(name).ok())
    }

    /// Like [`Config::to_topology`] with an explicit environment lookup.
    pub fn to_topology_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Topology, ConfigError> {
        self.check_unique_names()?;

        let enabled_auth: HashSet<&str> = self
            .auth
            .iter()
            .filter(|a| a.unit.enabled)
            .map(|a| a.unit.name.as_str())
            .collect();
        let enabled_gates: HashSet<&str> = self
            .dedup
            .iter()
            .filter(|d| d.unit.enabled)
            .map(|d| d.unit.name.as_str())
            .collect();

        let auth = self
            .auth
            .iter()
            .map(|section| self.auth_config(section, &env))
            .collect::<Result<_, _>>()?;
        let dedup = self
            .dedup
            .iter()
            .map(|section| self.dedup_config(section))
            .collect::<Result<_, _>>()?;
        let consumers = self
            .consumer
            .iter()
            .map(|section| self.consumer_config(section, &enabled_auth))
            .collect::<Result<_, _>>()?;
        let listeners = self
            .listener
            .iter()
            .map(|section| self.listener_config(section, &enabled_auth, &enabled_gates))
            .collect::<Result<_, _>>()?;

        Ok(Topology {
            auth,
            dedup,
            consumers,
            listeners,
        })
    }

    fn check_unique_names(&self) -> Result<(), ConfigError> {
        let names = self
            .auth
            .iter()
            .map(|s| &s.unit)
            .chain(self.dedup.iter().map(|s| &s.unit))
            .chain(self.consumer.iter().map(|s| &s.unit))
            .chain(self.listener.iter().map(|s| &s.unit))
            .map(|u| u.name.as_str());

        let mut seen = HashSet::new();
        for name in names {
            if name.trim().is_empty() {
                return Err(invalid("name", "unit names cannot be empty"));
            }
            if !seen.insert(name) {
                return Err(invalid("name", format!("unit name '{name}' is used twice")));
            }
        }
        Ok(())
    }

    fn unit_settings(
        &self,
        unit: &UnitSection,
        default_kind: Option<&str>,
    ) -> Result<UnitSettings, ConfigError> {
        let kind = unit
            .kind
            .as_deref()
            .or(default_kind)
            .ok_or_else(|| invalid(format!("{}.kind", unit.name), "a kind is required"))?;
        if unit.instances == 0 {
            return Err(invalid(
                format!("{}.instances", unit.name),
                "must be at least 1",
            ));
        }

        let mut settings = UnitSettings::new(unit.name.clone(), kind);
        settings.enabled = unit.enabled;
        settings.auto_start = unit.auto_start;
        settings.instances = unit.instances;
        settings.proxy = self.effective_proxy(unit)?;
        settings.parameters = unit
            .parameters
            .iter()
            .fold(Parameters::new(), |p, (k, v)| p.with(k.clone(), v.to_string()));
        Ok(settings)
    }

    /// A unit's own proxy fields, falling back to the file-level proxy.
    fn effective_proxy(&self, unit: &UnitSection) -> Result<Option<ProxyConfig>, ConfigError> {
        let own = unit.proxy.clone().unwrap_or_default();
        let global = self.proxy.clone().unwrap_or_default();
        match (own.host.or(global.host), own.port.or(global.port)) {
            (None, _) => Ok(None),
            (Some(host), Some(port)) => Ok(Some(ProxyConfig::new(host, port))),
            (Some(_), None) => Err(invalid(
                format!("{}.proxy.port", unit.name),
                "a proxy host needs a port",
            )),
        }
    }

    fn auth_config(
        &self,
        section: &AuthSection,
        env: &impl Fn(&str) -> Option<String>,
    ) -> Result<AuthConfig, ConfigError> {
        let unit = self.unit_settings(&section.unit, None)?;
        let name = unit.name.clone();
        let kind = unit.kind.clone();
        let mut config = AuthConfig::new(unit, section.server_url.clone());
        config.username.clone_from(&section.username);
        config.client_id.clone_from(&section.client_id);
        config.password = resolve_secret(&name, "PASSWORD", section.password.as_ref(), env);
        config.client_secret =
            resolve_secret(&name, "CLIENT_SECRET", section.client_secret.as_ref(), env);
        config.token = resolve_secret(&name, "TOKEN", section.token.as_ref(), env);

        let missing = |secret: &str| ConfigError::MissingSecret {
            provider: name.clone(),
            secret: secret.into(),
        };
        match kind.as_str() {
            "basic" => {
                config.username.as_ref().ok_or_else(|| missing("username"))?;
                config.password.as_ref().ok_or_else(|| missing("password"))?;
            }
            "password" => {
                config.username.as_ref().ok_or_else(|| missing("username"))?;
                config.password.as_ref().ok_or_else(|| missing("password"))?;
                config.client_id.as_ref().ok_or_else(|| missing("client_id"))?;
                config
                    .client_secret
                    .as_ref()
                    .ok_or_else(|| missing("client_secret"))?;
            }
            "static" => {
                config.token.as_ref().ok_or_else(|| missing("token"))?;
            }
            _ => {}
        }
        Ok(config)
    }

    fn dedup_config(&self, section: &DedupSection) -> Result<DedupConfig, ConfigError> {
        let unit = self.unit_settings(&section.unit, Some("memory"))?;
        if unit.kind == "redis" && section.redis_url.is_none() {
            return Err(invalid(
                format!("{}.redis_url", unit.name),
                "required for redis dedup gates",
            ));
        }
        let mut config = DedupConfig::new(unit);
        config.capacity = section.capacity;
        config.redis_url.clone_from(&section.redis_url);
        config.ttl = Duration::from_secs(section.ttl_secs);
        Ok(config)
    }

    fn consumer_config(
        &self,
        section: &ConsumerSection,
        enabled_auth: &HashSet<&str>,
    ) -> Result<ConsumerConfig, ConfigError> {
        let unit = self.unit_settings(&section.unit, Some("http"))?;
        let name = unit.name.clone();

        let url = section
            .url
            .as_deref()
            .map(|raw| {
                raw.parse::<url::Url>()
                    .map_err(|e| invalid(format!("{name}.url"), format!("'{raw}': {e}")))
            })
            .transpose()?;
        if unit.kind == "http" && url.is_none() {
            return Err(invalid(format!("{name}.url"), "required for http consumers"));
        }
        if let Some(provider) = &section.auth_name {
            if unit.enabled && !enabled_auth.contains(provider.as_str()) {
                return Err(invalid(
                    format!("{name}.auth_name"),
                    format!("no enabled auth provider named '{provider}'"),
                ));
            }
        }

        let mut config = ConsumerConfig::new(unit, section.address.clone());
        config.url = url;
        config.auth_name.clone_from(&section.auth_name);
        Ok(config)
    }

    fn listener_config(
        &self,
        section: &ListenerSection,
        enabled_auth: &HashSet<&str>,
        enabled_gates: &HashSet<&str>,
    ) -> Result<ListenerConfig, ConfigError> {
        let unit = self.unit_settings(&section.unit, Some("longpoll"))?;
        let name = unit.name.clone();

        if unit.enabled && !enabled_auth.contains(section.auth_name.as_str()) {
            return Err(invalid(
                format!("{name}.auth_name"),
                format!("no enabled auth provider named '{}'", section.auth_name),
            ));
        }
        if let Some(gate) = &section.dedup {
            if unit.enabled && !enabled_gates.contains(gate.as_str()) {
                return Err(invalid(
                    format!("{name}.dedup"),
                    format!("no enabled dedup gate named '{gate}'"),
                ));
            }
        }
        if section.destinations.is_empty() {
            return Err(invalid(
                format!("{name}.destinations"),
                "at least one destination address is required",
            ));
        }

        let mut config = ListenerConfig::new(
            unit,
            section.auth_name.clone(),
            section.topic.clone(),
            section.destinations.clone(),
        );
        config.dedup.clone_from(&section.dedup);
        config.api_version.clone_from(&section.api_version);
        config
            .address_suffix_field
            .clone_from(&section.address_suffix_field);
        Ok(config)
    }
}
