use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Which kind of session a client holds on a node.
///
/// A node admits one `control` session at a time; any number of clients
/// may hold `monitor` sessions alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Read-only: receives events and reads reports, cannot drive the job.
    Monitor,
    /// Full control: may edit sectors, switch modes and trigger inspections.
    Control,
}

impl AccessLevel {
    /// Access level requested by the `monitor` login flag.
    pub fn from_monitor_flag(monitor: bool) -> Self {
        if monitor { Self::Monitor } else { Self::Control }
    }

    /// Parse the level string carried by `sessionStateChange` events.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "monitor" => Some(Self::Monitor),
            "control" => Some(Self::Control),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monitor => "monitor",
            Self::Control => "control",
        }
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Username/password pair used to open a session.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

/// An authenticated session on a node.
///
/// Created by a successful login. Only the control slot can be taken over:
/// a `sessionStateChange` announcing a newly opened control session with a
/// different token invalidates our control session. Monitor sessions
/// coexist and are never superseded.
#[derive(Debug, Clone)]
pub struct LoginSession {
    pub access_level: AccessLevel,
    pub token: SecretString,
    pub user_id: Option<String>,
}

impl LoginSession {
    /// Returns `true` if another client opening a session at `level` with
    /// `token` means someone else now holds our control slot.
    pub fn is_superseded_by(&self, level: AccessLevel, token: &str) -> bool {
        self.is_control() && level == AccessLevel::Control && self.token.expose_secret() != token
    }

    pub fn is_control(&self) -> bool {
        self.access_level == AccessLevel::Control
    }
}
