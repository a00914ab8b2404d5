// ── Core error types ──
//
// Errors surfaced by the controller, correlator and run orchestrator.
// Wire failures pass through untouched so the node's status string reaches
// the operator exactly as the transport reported it.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Transport (passed through) ───────────────────────────────────
    #[error(transparent)]
    Transport(#[from] labelval_api::Error),

    // ── Waits ────────────────────────────────────────────────────────
    /// A composite operation did not observe its confirming event in time.
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    // ── Device state ─────────────────────────────────────────────────
    #[error("Not logged in")]
    NotLoggedIn,

    /// Mode switches are refused while no job is loaded.
    #[error("Node is idle")]
    DeviceIdle,

    #[error("No job name is known for the node")]
    NoJobName,

    // ── Correlation ──────────────────────────────────────────────────
    /// `begin_print` was called while another print is awaiting its repeat.
    #[error("A print is already in flight")]
    PrintInFlight,

    #[error("Print faulted: {reason}")]
    PrintFaulted { reason: String },

    // ── Collaborators ────────────────────────────────────────────────
    #[error("Printer error: {message}")]
    Printer { message: String },

    #[error("Result store error: {message}")]
    Store { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Run cancelled")]
    Cancelled,
}

impl CoreError {
    /// The status string an operator sees.
    pub fn status(&self) -> String {
        self.to_string()
    }

    /// Whether the node never confirmed the operation (as opposed to
    /// rejecting it).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` for a `410 Gone` transport failure.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_gone())
    }
}
