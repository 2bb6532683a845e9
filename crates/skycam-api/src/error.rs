use thiserror::Error;

/// Top-level error type for the `skycam-api` crate.
///
/// Covers every failure mode of both wire channels: TCP transport, the
/// Telnet login/command exchange, and the FTP control/data connections.
/// `skycam-core` maps these into its user-facing taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// TCP connect or login handshake failed (refused, unreachable, timed out).
    #[error("Cannot connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// Socket read/write failure on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The camera closed the connection.
    #[error("Connection closed by camera")]
    Closed,

    /// The channel has no open session (never connected, or closed).
    #[error("Channel is not connected")]
    NotConnected,

    /// A bounded wait elapsed.
    #[error("Timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected by the camera (Telnet or FTP).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Protocol ────────────────────────────────────────────────────
    /// Reply did not match the expected framing. Carries the raw text.
    #[error("Malformed reply: {raw:?}")]
    Protocol { raw: String },

    /// Request rejected locally before being written.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Negative FTP reply to a command.
    #[error("FTP error {code}: {message}")]
    Ftp { code: u16, message: String },

    /// Downloaded byte count disagrees with the remote listing.
    #[error("Incomplete transfer of {name}: expected {expected} bytes, received {received}")]
    IncompleteTransfer {
        name: String,
        expected: u64,
        received: u64,
    },
}

impl Error {
    /// Returns `true` if the underlying connection is gone and a reconnect
    /// might resolve it.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Io(_) | Self::Closed | Self::NotConnected
        )
    }

    /// Returns `true` if the session state is unknown after this error and
    /// the connection should not be reused.
    pub fn poisons_session(&self) -> bool {
        self.is_connection() || matches!(self, Self::Timeout { .. })
    }

    pub(crate) fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_classification() {
        assert!(Error::Closed.is_connection());
        assert!(Error::NotConnected.is_connection());
        assert!(
            Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset)).is_connection()
        );
        assert!(!Error::Protocol { raw: "?".into() }.is_connection());
        assert!(!Error::Timeout { timeout_ms: 5 }.is_connection());
        assert!(Error::Timeout { timeout_ms: 5 }.poisons_session());
        assert!(
            !Error::Ftp {
                code: 550,
                message: "nope".into()
            }
            .poisons_session()
        );
    }
}
