// ── Node operating state ──

use serde::Serialize;
use strum::{Display, EnumString};

/// Operating mode of a node's job.
///
/// Only ever set from what the node reports (heartbeat or state change),
/// never assumed from a command succeeding.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize,
)]
#[strum(ascii_case_insensitive)]
pub enum DeviceState {
    /// No job loaded, or no state reported yet.
    #[default]
    Idle,
    Editing,
    Running,
    Paused,
}

impl DeviceState {
    /// Parse a wire state string such as `"editing"`.
    pub fn from_wire(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

/// Snapshot of what the controller knows about its node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub state: DeviceState,
    /// Name of the loaded job. Cleared whenever the node goes idle.
    pub job_name: Option<String>,
}
