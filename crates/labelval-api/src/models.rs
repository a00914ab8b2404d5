// Wire models for node command responses.
//
// Only the fields the controller acts on are typed. Everything else is
// captured via `#[serde(flatten)]` so reports and jobs round-trip to
// storage without loss.

use serde::{Deserialize, Serialize};

/// Body returned by `POST /security/login`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub access_level: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

/// The job currently loaded on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    #[serde(default)]
    pub sectors: Vec<JobSector>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One sector definition inside a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSector {
    pub name: String,
    #[serde(default, rename = "type")]
    pub sector_type: Option<String>,
    #[serde(default)]
    pub symbology: Option<String>,
    #[serde(default, rename = "matchSettings")]
    pub match_settings: Option<MatchSettings>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSettings {
    #[serde(default)]
    pub match_mode: u8,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MatchSettings {
    /// Sequential, match-start and file-start modes depend on print order,
    /// so a run has to restart the job between loops when any sector uses them.
    pub fn is_sequencing(&self) -> bool {
        (3..=6).contains(&self.match_mode)
    }
}

impl Job {
    pub fn has_sequencing(&self) -> bool {
        self.sectors
            .iter()
            .filter_map(|s| s.match_settings.as_ref())
            .any(MatchSettings::is_sequencing)
    }
}

/// A symbology the node can verify, and the sector type it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Symbology {
    pub symbology: String,
    /// `verify1D` or `verify2D`.
    pub region_type: String,
}

/// Repeats the node still holds images for.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailableRepeats(pub Vec<u32>);

impl AvailableRepeats {
    pub fn first(&self) -> Option<u32> {
        self.0.first().copied()
    }
}

/// One device entry from the system-level discovery endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDevice {
    #[serde(default)]
    pub node_number: Option<u16>,
    #[serde(default)]
    pub camera_mac: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Devices {
    #[serde(default)]
    pub nodes: Vec<NodeDevice>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
