use thiserror::Error;

/// Top-level error type for the `labelval-api` crate.
///
/// Every variant renders as the human-readable status string an operator
/// sees for a failed node operation. `labelval-core` passes these through
/// unchanged so diagnostics survive composite operations.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login was rejected by the node.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// A command that needs a session was issued before login.
    #[error("Not logged in")]
    NotLoggedIn,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The node answered with a non-success status code.
    #[error("{code} {reason}")]
    Status {
        code: u16,
        reason: String,
        body: String,
    },

    /// The node answered 2xx but the body was not the JSON the command expects.
    #[error("Return data is not JSON: \"{preview}\"")]
    NotJson { preview: String },

    /// JSON was returned but did not match the expected shape.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Event stream ────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("Event stream connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the peer without being asked to.
    #[error("Event stream closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// An inbound frame could not be decoded into an event.
    #[error("Malformed event frame: {0}")]
    MalformedFrame(String),
}

impl Error {
    /// The status string reported for this failure.
    pub fn status(&self) -> String {
        self.to_string()
    }

    /// Returns `true` for `410 Gone`, which the node uses for repeat
    /// images that have already been recycled.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Status { code: 410, .. })
    }

    /// Returns `true` if the node rejected the session.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::NotLoggedIn | Self::Status { code: 401, .. }
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Status { code, .. } => *code == 503,
            Self::WebSocketConnect(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_renders_code_and_reason() {
        let err = Error::Status {
            code: 410,
            reason: "Gone".into(),
            body: String::new(),
        };
        assert_eq!(err.status(), "410 Gone");
        assert!(err.is_gone());
        assert!(!err.is_transient());
    }

    #[test]
    fn not_json_quotes_the_body() {
        let err = Error::NotJson {
            preview: "<html>".into(),
        };
        assert_eq!(err.status(), "Return data is not JSON: \"<html>\"");
    }

    #[test]
    fn unauthorized_counts_as_expired_session() {
        let err = Error::Status {
            code: 401,
            reason: "Unauthorized".into(),
            body: String::new(),
        };
        assert!(err.is_auth_expired());
    }
}
