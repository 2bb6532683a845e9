// ── Core error types ──
//
// User-facing errors from skycam-core. Consumers never see raw socket
// errors or FTP reply codes directly: the `From<skycam_api::Error>` impl
// translates wire-level failures into domain-appropriate variants.

use thiserror::Error;

use crate::model::CameraState;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    /// Transport failure.
    #[error("Camera connection failed: {message}")]
    Connection { message: String },

    /// The camera refused the configured credentials.
    #[error("Camera authentication failed: {message}")]
    Authentication { message: String },

    #[error("Camera did not answer within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    // ── Protocol errors ──────────────────────────────────────────────
    /// Malformed or unexpected reply. Carries the raw text.
    #[error("Unexpected reply from camera: {raw:?}")]
    Protocol { raw: String },

    #[error("Incomplete transfer of {name}: expected {expected} bytes, received {received}")]
    IncompleteTransfer {
        name: String,
        expected: u64,
        received: u64,
    },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("{name} {value} is out of range ({min}..={max})")]
    InvalidParameter {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// The camera rejected a well-formed command.
    #[error("Camera rejected {verb}: {message}")]
    Command { verb: String, message: String },

    /// A request that cannot be expressed on the wire.
    #[error("Invalid command: {message}")]
    InvalidCommand { message: String },

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: CameraState,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Whether a reconnect might resolve this error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Authentication { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub(crate) fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

// ── Conversion from wire-level errors ────────────────────────────────

impl From<skycam_api::Error> for CoreError {
    fn from(err: skycam_api::Error) -> Self {
        use skycam_api::Error as Api;

        match err {
            Api::Connect { addr, reason } => Self::Connection {
                message: format!("{addr}: {reason}"),
            },
            Api::Io(e) => Self::Connection {
                message: e.to_string(),
            },
            Api::Closed => Self::Connection {
                message: "connection closed by camera".into(),
            },
            Api::NotConnected => Self::Connection {
                message: "channel is not connected".into(),
            },
            Api::Authentication { message } => Self::Authentication { message },
            Api::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            Api::Protocol { raw } => Self::Protocol { raw },
            Api::Ftp { code, message } => Self::Protocol {
                raw: format!("{code} {message}"),
            },
            Api::InvalidCommand(message) => Self::InvalidCommand { message },
            Api::IncompleteTransfer {
                name,
                expected,
                received,
            } => Self::IncompleteTransfer {
                name,
                expected,
                received,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wire_errors_map_to_domain_variants() {
        let closed = CoreError::from(skycam_api::Error::Closed);
        assert!(closed.is_connection());
        assert_eq!(closed.to_string(), "Camera connection failed: connection closed by camera");

        let auth = CoreError::from(skycam_api::Error::Authentication {
            message: "Invalid Password".into(),
        });
        assert!(auth.is_connection());
        assert!(matches!(
            auth,
            CoreError::Authentication { ref message } if message == "Invalid Password"
        ));

        let timeout = CoreError::from(skycam_api::Error::Timeout { timeout_ms: 20 });
        assert!(timeout.is_timeout());
        assert!(!timeout.is_connection());

        let ftp = CoreError::from(skycam_api::Error::Ftp {
            code: 550,
            message: "No such file".into(),
        });
        assert!(matches!(ftp, CoreError::Protocol { ref raw } if raw == "550 No such file"));
    }

    #[test]
    fn invalid_state_message() {
        let err = CoreError::InvalidState {
            operation: "capture",
            state: CameraState::Faulted,
        };
        assert_eq!(err.to_string(), "Cannot capture while faulted");
    }
}
