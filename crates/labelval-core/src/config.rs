// ── Runtime node configuration ──
//
// These types describe *how* to talk to one verification node. They carry
// credentials and timing, but never touch disk. The CLI builds a
// `NodeConfig` from its profile file and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use labelval_api::{Credentials, NodeEndpoint, StreamConfig, TransportConfig};

/// Default port of the verification system's discovery service.
pub const DEFAULT_SYSTEM_PORT: u16 = 8080;

/// Timeouts for the composite operations that wait on events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Inspect: wait for `labelEnd`.
    pub inspect: Duration,
    /// Detect sectors: wait for the terminal `setupDetect`.
    pub detect: Duration,
    pub switch_to_edit: Duration,
    pub switch_to_run: Duration,
    /// How long a print may go without a repeat before it is faulted.
    pub correlation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            inspect: Duration::from_secs(10),
            detect: Duration::from_secs(20),
            switch_to_edit: Duration::from_secs(10),
            switch_to_run: Duration::from_secs(30),
            correlation: Duration::from_secs(10),
        }
    }
}

/// Configuration for one node.
///
/// Built by the CLI, passed to `DeviceController`. Core never reads
/// config files.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub endpoint: NodeEndpoint,
    pub credentials: Credentials,
    pub timeouts: Timeouts,
    pub transport: TransportConfig,
    pub stream: StreamConfig,
    /// Log back in automatically when the event stream faults.
    pub reconnect_on_fault: bool,
}

impl NodeConfig {
    pub fn new(endpoint: NodeEndpoint, credentials: Credentials) -> Self {
        Self {
            endpoint,
            credentials,
            timeouts: Timeouts::default(),
            transport: TransportConfig::default(),
            stream: StreamConfig::default(),
            reconnect_on_fault: false,
        }
    }
}

// ── Discovery ────────────────────────────────────────────────────────

/// Host-specific defaults for locating a verification system.
///
/// Where the vendor software is installed, and which port its system
/// service listens on, is platform configuration. Implementations live
/// outside core (see `labelval-config`).
pub trait DiscoveryProvider: Send + Sync {
    /// Port of the system service when the operator has not set one.
    fn default_system_port(&self) -> u16 {
        DEFAULT_SYSTEM_PORT
    }

    /// Directory the vendor software keeps its data in, if known.
    fn data_dir(&self) -> Option<PathBuf>;
}
