//! CLI flag overrides layered over `labelval_config` profiles.
//!
//! This is the single boundary where CLI config types cross into core
//! types: everything downstream receives a finished `NodeConfig`.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use labelval_config::{Config, PlatformDiscovery, Profile};
use labelval_core::api::{Credentials, NodeEndpoint, TransportConfig};
use labelval_core::{DiscoveryProvider, NodeConfig, Timeouts};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use labelval_config::config_path;

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    labelval_config::load_config_or_default()
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build the `NodeConfig` for this invocation.
///
/// A matching profile is used with flag overrides on top. Without one, the
/// node is described by flags and environment alone, and `--host` is
/// mandatory.
pub fn build_node_config(global: &GlobalOpts, cfg: &Config) -> Result<NodeConfig, CliError> {
    let profile_name = active_profile_name(global, cfg);

    if let Some(profile) = cfg.profiles.get(&profile_name) {
        return resolve_profile(profile, &profile_name, cfg, global);
    }
    if global.profile.is_some() {
        let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
        available.sort();
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: if available.is_empty() {
                "(none)".into()
            } else {
                available.join(", ")
            },
        });
    }

    let host = global.host.clone().ok_or_else(|| CliError::NoConfig {
        path: config_path().display().to_string(),
    })?;
    let credentials = flag_credentials(global).ok_or(CliError::NoCredentials {
        profile: profile_name,
    })?;

    let discovery = PlatformDiscovery::default();
    let endpoint = endpoint_from_flags(
        global,
        host,
        global.system_port.unwrap_or_else(|| discovery.default_system_port()),
        1,
        None,
    )?;

    let mut config = NodeConfig::new(endpoint, credentials);
    config.transport = transport(global.timeout.unwrap_or(cfg.defaults.timeout));
    config.timeouts = cfg.defaults.timeouts.apply(Timeouts::default());
    Ok(config)
}

/// Translate a profile plus global flags into a `NodeConfig`.
fn resolve_profile(
    profile: &Profile,
    profile_name: &str,
    cfg: &Config,
    global: &GlobalOpts,
) -> Result<NodeConfig, CliError> {
    // Flag credentials win; otherwise walk the profile's credential chain.
    let mut effective = profile.clone();
    if let Some(ref user) = global.username {
        effective.username = Some(user.clone());
    }
    if let Some(ref pw) = global.password {
        effective.password = Some(pw.clone());
        effective.password_env = None;
    }

    let discovery = PlatformDiscovery::default();
    let mut config = labelval_config::profile_to_node_config(
        &effective,
        profile_name,
        &cfg.defaults,
        &discovery,
    )?;

    if global.host.is_some()
        || global.node.is_some()
        || global.system_port.is_some()
        || global.node_port.is_some()
    {
        config.endpoint = endpoint_from_flags(
            global,
            global.host.clone().unwrap_or_else(|| profile.host.clone()),
            global.system_port.unwrap_or(config.endpoint.system_port),
            profile.node_number,
            profile.node_port,
        )?;
    }
    if let Some(secs) = global.timeout {
        config.transport = transport(secs);
    }
    Ok(config)
}

fn endpoint_from_flags(
    global: &GlobalOpts,
    host: String,
    system_port: u16,
    profile_node: u16,
    profile_node_port: Option<u16>,
) -> Result<NodeEndpoint, CliError> {
    let node = global.node.unwrap_or(profile_node);
    if node == 0 {
        return Err(CliError::Validation {
            field: "node".into(),
            reason: "node numbers start at 1".into(),
        });
    }
    let endpoint = NodeEndpoint::new(host, system_port, node);
    // A profile's node port belongs to the profile's node only.
    let node_port = global
        .node_port
        .or(profile_node_port.filter(|_| node == profile_node));
    Ok(match node_port {
        Some(port) => endpoint.with_node_port(port),
        None => endpoint,
    })
}

fn flag_credentials(global: &GlobalOpts) -> Option<Credentials> {
    let username = global.username.clone()?;
    let password = global.password.clone()?;
    Some(Credentials::new(username, SecretString::from(password)))
}

fn transport(timeout_secs: u64) -> TransportConfig {
    TransportConfig {
        timeout: Duration::from_secs(timeout_secs),
        ..TransportConfig::default()
    }
}

/// Vendor data directory, when the platform knows one.
pub fn vendor_data_dir() -> Option<PathBuf> {
    PlatformDiscovery::default().data_dir()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["labelval"];
        argv.extend_from_slice(args);
        argv.push("status");
        Cli::try_parse_from(argv).unwrap().global
    }

    fn config_with(name: &str, profile: Profile) -> Config {
        let mut cfg = Config::default();
        cfg.profiles.insert(name.into(), profile);
        cfg
    }

    #[test]
    fn flags_alone_describe_a_node() {
        let g = global(&["--host", "10.0.0.5", "-n", "2", "-u", "op", "--password", "pw"]);
        let node = build_node_config(&g, &Config::default()).unwrap();
        assert_eq!(node.endpoint.host, "10.0.0.5");
        assert_eq!(node.endpoint.port(), 8082);
        assert_eq!(node.credentials.username, "op");
    }

    #[test]
    fn missing_host_without_profile_is_no_config() {
        let g = global(&["-u", "op", "--password", "pw"]);
        let err = build_node_config(&g, &Config::default()).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }

    #[test]
    fn unknown_named_profile_lists_alternatives() {
        let cfg = config_with("line-1", Profile::new("a"));
        let g = global(&["-p", "line-9"]);
        match build_node_config(&g, &cfg).unwrap_err() {
            CliError::ProfileNotFound { available, .. } => assert_eq!(available, "line-1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn flags_override_profile_endpoint() {
        let cfg = config_with(
            "default",
            Profile {
                username: Some("admin".into()),
                password: Some("secret".into()),
                node_port: Some(18081),
                ..Profile::new("sim.local")
            },
        );

        let node = build_node_config(&global(&[]), &cfg).unwrap();
        assert_eq!(node.endpoint.port(), 18081);

        let node = build_node_config(&global(&["-n", "3", "--timeout", "5"]), &cfg).unwrap();
        assert_eq!(node.endpoint.host, "sim.local");
        assert_eq!(node.endpoint.port(), 8083);
        assert_eq!(node.transport.timeout, Duration::from_secs(5));
    }
}
