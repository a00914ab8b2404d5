//! Shared configuration for labelval.
//!
//! TOML node profiles, credential resolution (env + keyring + plaintext),
//! and translation to `labelval_core::NodeConfig`. The CLI layers its
//! flag overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use labelval_core::api::{Credentials, NodeEndpoint, TransportConfig};
use labelval_core::{DiscoveryProvider, NodeConfig, Timeouts};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const KEYRING_SERVICE: &str = "labelval";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named node profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Transport request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub timeouts: TimeoutOverrides,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            timeouts: TimeoutOverrides::default(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// Per-operation wait timeouts in seconds. Unset values keep the
/// built-in defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TimeoutOverrides {
    pub inspect: Option<u64>,
    pub detect: Option<u64>,
    pub switch_to_edit: Option<u64>,
    pub switch_to_run: Option<u64>,
    pub correlation: Option<u64>,
}

impl TimeoutOverrides {
    pub fn apply(&self, base: Timeouts) -> Timeouts {
        let secs = |v: Option<u64>, d: Duration| v.map_or(d, Duration::from_secs);
        Timeouts {
            inspect: secs(self.inspect, base.inspect),
            detect: secs(self.detect, base.detect),
            switch_to_edit: secs(self.switch_to_edit, base.switch_to_edit),
            switch_to_run: secs(self.switch_to_run, base.switch_to_run),
            correlation: secs(self.correlation, base.correlation),
        }
    }
}

/// A named verification node.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Host of the verification system (e.g., "192.168.1.50").
    pub host: String,

    /// Port of the system service. Falls back to the discovery default.
    pub system_port: Option<u16>,

    /// Node number on the system, starting at 1.
    #[serde(default = "default_node_number")]
    pub node_number: u16,

    /// Explicit node port, for simulators and port forwards.
    pub node_port: Option<u16>,

    pub username: Option<String>,

    /// Password (plaintext; prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Log in with a read-only monitor session by default.
    #[serde(default)]
    pub monitor: bool,

    /// Log back in when the event stream drops.
    #[serde(default)]
    pub reconnect: bool,

    /// Override the transport timeout.
    pub timeout: Option<u64>,

    /// Override per-operation timeouts.
    #[serde(default)]
    pub timeouts: TimeoutOverrides,
}

fn default_node_number() -> u16 {
    1
}

impl Profile {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            system_port: None,
            node_number: default_node_number(),
            node_port: None,
            username: None,
            password: None,
            password_env: None,
            monitor: false,
            reconnect: false,
            timeout: None,
            timeouts: TimeoutOverrides::default(),
        }
    }
}

// ── Discovery ───────────────────────────────────────────────────────

/// Platform discovery defaults backed by the user's project directories.
#[derive(Debug, Clone)]
pub struct PlatformDiscovery {
    system_port: u16,
}

impl PlatformDiscovery {
    pub fn new(system_port: u16) -> Self {
        Self { system_port }
    }
}

impl Default for PlatformDiscovery {
    fn default() -> Self {
        Self::new(labelval_core::DEFAULT_SYSTEM_PORT)
    }
}

impl DiscoveryProvider for PlatformDiscovery {
    fn default_system_port(&self) -> u16 {
        self.system_port
    }

    fn data_dir(&self) -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }
}

// ── Config file path ────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "labelval", "labelval")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("labelval");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path`, then `LABELVAL_`-prefixed environment variables
/// (nested keys separated by `__`, e.g. `LABELVAL_DEFAULTS__TIMEOUT`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("LABELVAL_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Credential resolution (without CLI flags) ───────────────────────

/// Resolve username and password for a profile.
///
/// Username: profile, then `LABELVAL_USERNAME`. Password: the profile's
/// `password_env` variable, `LABELVAL_PASSWORD`, the system keyring, then
/// plaintext in the config.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<Credentials, ConfigError> {
    let no_credentials = || ConfigError::NoCredentials {
        profile: profile_name.into(),
    };

    let username = profile
        .username
        .clone()
        .or_else(|| std::env::var("LABELVAL_USERNAME").ok())
        .ok_or_else(no_credentials)?;

    // 1. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env {
        if let Ok(pw) = std::env::var(env_name) {
            return Ok(Credentials::new(username, SecretString::from(pw)));
        }
    }

    // 2. Global env var
    if let Ok(pw) = std::env::var("LABELVAL_PASSWORD") {
        return Ok(Credentials::new(username, SecretString::from(pw)));
    }

    // 3. Keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password")) {
        if let Ok(pw) = entry.get_password() {
            tracing::debug!(profile = profile_name, "password from keyring");
            return Ok(Credentials::new(username, SecretString::from(pw)));
        }
    }

    // 4. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(Credentials::new(username, SecretString::from(pw.clone())));
    }

    Err(no_credentials())
}

/// Store a profile's password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
        .and_then(|entry| entry.set_password(password))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

/// The node endpoint a profile points at.
pub fn profile_endpoint(profile: &Profile, discovery: &dyn DiscoveryProvider) -> NodeEndpoint {
    let system_port = profile
        .system_port
        .unwrap_or_else(|| discovery.default_system_port());
    let endpoint = NodeEndpoint::new(profile.host.clone(), system_port, profile.node_number);
    match profile.node_port {
        Some(port) => endpoint.with_node_port(port),
        None => endpoint,
    }
}

/// Build a `NodeConfig` from a profile, no CLI flag overrides.
pub fn profile_to_node_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
    discovery: &dyn DiscoveryProvider,
) -> Result<NodeConfig, ConfigError> {
    if profile.host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: "must not be empty".into(),
        });
    }
    if profile.node_number == 0 {
        return Err(ConfigError::Validation {
            field: "node_number".into(),
            reason: "node numbers start at 1".into(),
        });
    }

    let credentials = resolve_credentials(profile, profile_name)?;
    let mut config = NodeConfig::new(profile_endpoint(profile, discovery), credentials);

    config.transport = TransportConfig {
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        ..TransportConfig::default()
    };
    config.timeouts = profile
        .timeouts
        .apply(defaults.timeouts.apply(Timeouts::default()));
    config.reconnect_on_fault = profile.reconnect;
    Ok(config)
}
