//! CLI error types with miette diagnostics.
//!
//! Maps config and core failures into user-facing errors with help text
//! and process exit codes.

use miette::Diagnostic;
use thiserror::Error;

use streamgate_config::ConfigError;
use streamgate_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const SHUTDOWN: i32 = 5;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(streamgate::no_config),
        help("Pass --config <FILE> or set STREAMGATE_CONFIG.\nExpected at: {path}")
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(
        code(streamgate::config),
        help("Run `streamgate check` to validate the topology file.")
    )]
    Config(ConfigError),

    #[error("Topology defines no units")]
    #[diagnostic(
        code(streamgate::empty_topology),
        help("Add at least one [[listener]] or [[consumer]] section.")
    )]
    EmptyTopology,

    #[error("Unit '{unit}' cannot be built: {source}")]
    #[diagnostic(code(streamgate::invalid_unit))]
    InvalidUnit {
        unit: String,
        #[source]
        source: CoreError,
    },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Pipeline failed to start: {0}")]
    #[diagnostic(code(streamgate::startup))]
    Startup(CoreError),

    #[error("Shutdown incomplete: {0}")]
    #[diagnostic(
        code(streamgate::shutdown),
        help("A listener did not drain in time. Raise --stop-timeout if polls are long.")
    )]
    Shutdown(CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => Self::NoConfig {
                path: path.display().to_string(),
            },
            other => Self::Config(other),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } => exit_code::NOT_FOUND,
            Self::Config(_) | Self::EmptyTopology | Self::InvalidUnit { .. } => exit_code::USAGE,
            Self::Startup(CoreError::Config { .. } | CoreError::UnknownUnitKind { .. }) => {
                exit_code::USAGE
            }
            Self::Shutdown(_) => exit_code::SHUTDOWN,
            Self::Startup(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}
