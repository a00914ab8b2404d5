//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use labelval_config::ConfigError;
use labelval_core::CoreError;
use labelval_core::api::Error as ApiError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const STATE: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const INTERRUPTED: i32 = 130;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach node at {node}")]
    #[diagnostic(
        code(labelval::connection_failed),
        help(
            "Check that the verification software is running and reachable.\n\
             Try: labelval devices --host <host>"
        )
    )]
    ConnectionFailed {
        node: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Event stream for {node} failed: {message}")]
    #[diagnostic(code(labelval::stream))]
    Stream { node: String, message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Login rejected: {message}")]
    #[diagnostic(
        code(labelval::auth_failed),
        help("Verify the username and password, or run: labelval config set-password")
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(labelval::no_credentials),
        help(
            "Pass --username and --password, set LABELVAL_USERNAME / LABELVAL_PASSWORD,\n\
             or run: labelval config set-password"
        )
    )]
    NoCredentials { profile: String },

    #[error("Not logged in to the node")]
    #[diagnostic(code(labelval::not_logged_in))]
    NotLoggedIn,

    // ── Node state ───────────────────────────────────────────────────
    #[error("Node is idle")]
    #[diagnostic(
        code(labelval::device_idle),
        help("Open a job on the node first; an idle node cannot switch modes.")
    )]
    DeviceIdle,

    #[error("Node has no job loaded")]
    #[diagnostic(
        code(labelval::no_job),
        help("Load a job in the editor before switching to run mode.")
    )]
    NoJobName,

    #[error("Node answered {status}")]
    #[diagnostic(code(labelval::node))]
    Node { status: String },

    // ── Runs ─────────────────────────────────────────────────────────
    #[error("Print failed: {reason}")]
    #[diagnostic(code(labelval::print_faulted))]
    PrintFaulted { reason: String },

    #[error("Printer error: {message}")]
    #[diagnostic(
        code(labelval::printer),
        help("Check --print-command and that the printer is online.")
    )]
    Printer { message: String },

    #[error("Interrupted")]
    #[diagnostic(code(labelval::interrupted))]
    Interrupted,

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out waiting for {operation}")]
    #[diagnostic(
        code(labelval::timeout),
        help("Increase the wait with --wait, or check that the node is grabbing images.")
    )]
    Timeout { operation: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(labelval::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(labelval::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: labelval config add-profile"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No node configured")]
    #[diagnostic(
        code(labelval::no_config),
        help(
            "Pass --host, or create a profile with: labelval config add-profile\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(labelval::config))]
    Config(Box<figment::Error>),

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(labelval::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(labelval::json), help("Check the JSON file contents and try again."))]
    Json(#[from] serde_json::Error),

    #[error("Invalid roll manifest: {0}")]
    #[diagnostic(code(labelval::manifest))]
    Manifest(#[from] toml::de::Error),

    #[error("{0}")]
    #[diagnostic(code(labelval::internal))]
    Internal(String),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Stream { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } | Self::NotLoggedIn => {
                exit_code::AUTH
            }
            Self::DeviceIdle | Self::NoJobName => exit_code::STATE,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. }
            | Self::NonInteractiveRequiresYes { .. }
            | Self::ProfileNotFound { .. }
            | Self::NoConfig { .. } => exit_code::USAGE,
            Self::Interrupted => exit_code::INTERRUPTED,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Transport(api) => api.into(),
            CoreError::Timeout { operation } => CliError::Timeout {
                operation: operation.into(),
            },
            CoreError::NotLoggedIn => CliError::NotLoggedIn,
            CoreError::DeviceIdle => CliError::DeviceIdle,
            CoreError::NoJobName => CliError::NoJobName,
            CoreError::PrintInFlight => CliError::Internal("a print is already in flight".into()),
            CoreError::PrintFaulted { reason } => CliError::PrintFaulted { reason },
            CoreError::Printer { message } => CliError::Printer { message },
            CoreError::Store { message } => CliError::Internal(format!("result store: {message}")),
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Cancelled => CliError::Interrupted,
        }
    }
}

impl From<ApiError> for CliError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Authentication { message } => CliError::AuthFailed { message },
            ApiError::NotLoggedIn => CliError::NotLoggedIn,
            ApiError::Transport(e) => CliError::ConnectionFailed {
                node: e
                    .url()
                    .map_or_else(|| "(unknown)".into(), ToString::to_string),
                source: Box::new(e),
            },
            ApiError::WebSocketConnect(message) => CliError::Stream {
                node: "event stream".into(),
                message,
            },
            ApiError::WebSocketClosed { code, reason } => CliError::Stream {
                node: "event stream".into(),
                message: format!("closed ({code}): {reason}"),
            },
            other => CliError::Node {
                status: other.status(),
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                available: String::new(),
            },
            ConfigError::Serialization(e) => CliError::Validation {
                field: "config".into(),
                reason: format!("failed to serialize config: {e}"),
            },
            ConfigError::Figment(e) => CliError::Config(e),
            ConfigError::Io(e) => CliError::Io(e),
        }
    }
}
