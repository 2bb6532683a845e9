//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use skycam_config::ConfigError;
use skycam_core::{CameraState, CoreError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const REJECTED: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach camera at {host}")]
    #[diagnostic(
        code(skycam::connection_failed),
        help(
            "Check that the camera is powered and reachable.\n\
             Reason: {reason}\n\
             Try: skycam info --host <ip> --timeout 5"
        )
    )]
    ConnectionFailed { host: String, reason: String },

    #[error("Camera rejected the login")]
    #[diagnostic(
        code(skycam::auth_failed),
        help(
            "Verify username and password for profile '{profile}'.\n\
             The password is read from password_env, SKYCAM_PASSWORD, or the profile."
        )
    )]
    AuthFailed { profile: String },

    #[error("Camera did not answer within {timeout_ms} ms")]
    #[diagnostic(
        code(skycam::timeout),
        help("Increase the timeout with --timeout or check the camera's load.")
    )]
    Timeout { timeout_ms: u64 },

    #[error("Camera session faulted")]
    #[diagnostic(
        code(skycam::faulted),
        help("Reconnect attempts were exhausted. Check the network and run the command again.")
    )]
    Faulted,

    // ── Camera replies ───────────────────────────────────────────────
    #[error("Camera rejected '{verb}': {message}")]
    #[diagnostic(code(skycam::rejected))]
    Rejected { verb: String, message: String },

    #[error("Unexpected reply from camera: {raw}")]
    #[diagnostic(code(skycam::protocol))]
    Protocol { raw: String },

    #[error("Frame '{name}' arrived incomplete ({received} of {expected} bytes)")]
    #[diagnostic(
        code(skycam::incomplete_transfer),
        help("The camera may still be writing the file. Try again.")
    )]
    IncompleteTransfer {
        name: String,
        expected: u64,
        received: u64,
    },

    #[error("No new frame available")]
    #[diagnostic(
        code(skycam::no_frame),
        help("The camera produced no new image file. Check the profile's image_filename / image_dir.")
    )]
    NoFrame,

    #[error("Cannot {operation} while {state}")]
    #[diagnostic(code(skycam::invalid_state))]
    InvalidState {
        operation: String,
        state: CameraState,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(skycam::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(skycam::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Config file: {path}"
        )
    )]
    ProfileNotFound {
        name: String,
        available: String,
        path: String,
    },

    #[error(transparent)]
    #[diagnostic(code(skycam::config))]
    Config(ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode JSON: {0}")]
    #[diagnostic(code(skycam::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Faulted => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Validation { .. } | Self::ProfileNotFound { .. } | Self::Config(_) => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

/// Convert with the context only the caller knows (host, profile).
pub fn from_core(err: CoreError, host: &str, profile: &str) -> CliError {
    match err {
        CoreError::Authentication { .. } => CliError::AuthFailed {
            profile: profile.to_owned(),
        },
        CoreError::Connection { message } => CliError::ConnectionFailed {
            host: host.to_owned(),
            reason: message,
        },
        CoreError::Timeout { timeout_ms } => CliError::Timeout { timeout_ms },
        CoreError::Protocol { raw } => CliError::Protocol { raw },
        CoreError::IncompleteTransfer {
            name,
            expected,
            received,
        } => CliError::IncompleteTransfer {
            name,
            expected,
            received,
        },
        CoreError::InvalidParameter {
            name,
            value,
            min,
            max,
        } => CliError::Validation {
            field: name,
            reason: format!("{value} is outside {min}..={max}"),
        },
        CoreError::Command { verb, message } => CliError::Rejected { verb, message },
        CoreError::InvalidCommand { message } => CliError::Validation {
            field: "command".into(),
            reason: message,
        },
        CoreError::InvalidState {
            state: CameraState::Faulted,
            ..
        } => CliError::Faulted,
        CoreError::InvalidState { operation, state } => CliError::InvalidState {
            operation: operation.to_owned(),
            state,
        },
        CoreError::Config { message } => CliError::Validation {
            field: "config".into(),
            reason: message,
        },
    }
}
