// ── Runtime connection configuration ──
//
// These types describe *how* to talk to one camera. They carry credentials
// and tuning values but never touch disk: the CLI (via skycam-config)
// builds a `ConnectionConfig` and hands it to the controller.

use std::time::Duration;

use chrono::NaiveTime;
use secrecy::SecretString;
use skycam_api::{CommandSettings, Dialect, FrameLocator, RetrievalSettings};

use crate::error::CoreError;

pub const DEFAULT_HOST: &str = "100.1.9.31";
pub const DEFAULT_COMMAND_PORT: u16 = 23;
pub const DEFAULT_FTP_PORT: u16 = 21;
pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(5);
pub const DEFAULT_FTP_SESSION_MAX_AGE: Duration = Duration::from_secs(600);

/// Everything needed to open and run one camera session.
///
/// Immutable once handed to a controller.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    /// Telnet command port.
    pub command_port: u16,
    pub ftp_port: u16,
    pub username: String,
    pub password: SecretString,
    /// Bounds connects, logins and every single reply.
    pub timeout: Duration,
    pub dialect: Dialect,
    pub frame_locator: FrameLocator,
    pub delete_after_fetch: bool,
    /// FTP sessions older than this are re-established. `None` keeps them.
    pub ftp_session_max_age: Option<Duration>,
    /// FTP `NOOP` period while connected. Zero disables keep-alive.
    pub keep_alive_interval: Duration,
    pub limits: ParameterLimits,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            command_port: DEFAULT_COMMAND_PORT,
            ftp_port: DEFAULT_FTP_PORT,
            username: DEFAULT_USERNAME.to_owned(),
            password: SecretString::from(String::new()),
            timeout: DEFAULT_TIMEOUT,
            dialect: Dialect::default(),
            frame_locator: FrameLocator::default(),
            delete_after_fetch: false,
            ftp_session_max_age: Some(DEFAULT_FTP_SESSION_MAX_AGE),
            keep_alive_interval: DEFAULT_KEEP_ALIVE,
            limits: ParameterLimits::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn command_settings(&self) -> CommandSettings {
        CommandSettings {
            host: self.host.clone(),
            port: self.command_port,
            username: self.username.clone(),
            password: self.password.clone(),
            timeout: self.timeout,
            dialect: self.dialect,
        }
    }

    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            host: self.host.clone(),
            port: self.ftp_port,
            username: self.username.clone(),
            password: self.password.clone(),
            timeout: self.timeout,
            locator: self.frame_locator.clone(),
            delete_after_fetch: self.delete_after_fetch,
            session_max_age: self.ftp_session_max_age,
        }
    }
}

// ── Parameter limits ─────────────────────────────────────────────────

/// Valid range and resolution of one numeric camera parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    /// Values are rounded to this many decimal places before validation.
    pub decimals: i32,
}

impl ParameterRange {
    pub const fn new(min: f64, max: f64, decimals: i32) -> Self {
        Self { min, max, decimals }
    }

    /// Round `value` to the configured resolution and check the range.
    pub fn normalize(&self, name: &str, value: f64) -> Result<f64, CoreError> {
        let factor = 10_f64.powi(self.decimals);
        let rounded = (value * factor).round() / factor;
        if rounded.is_finite() && (self.min..=self.max).contains(&rounded) {
            Ok(rounded)
        } else {
            Err(CoreError::InvalidParameter {
                name: name.to_owned(),
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Exposure (ms, 0.1 resolution) and gain (integer) ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterLimits {
    pub exposure: ParameterRange,
    pub gain: ParameterRange,
}

impl Default for ParameterLimits {
    fn default() -> Self {
        Self {
            exposure: ParameterRange::new(0.0, 1000.0, 1),
            gain: ParameterRange::new(0.0, 240.0, 0),
        }
    }
}

// ── Reconnect policy ─────────────────────────────────────────────────

/// Bounded reconnection used while streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before giving up and faulting. Zero faults immediately.
    pub max_attempts: u32,
    /// Wait before each attempt.
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

// ── Streaming options ────────────────────────────────────────────────

/// Per-run streaming parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Time between cycle starts.
    pub interval: Duration,
    /// End the run at the next occurrence of this local time of day.
    pub stop_at: Option<NaiveTime>,
    /// Abandon a capture+fetch cycle after this long. Defaults to three
    /// times the connection timeout.
    pub cycle_timeout: Option<Duration>,
    /// Bound on joining the worker tasks when stopping.
    pub stop_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_STREAM_INTERVAL,
            stop_at: None,
            cycle_timeout: None,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl StreamOptions {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn exposure_rounds_to_tenths() {
        let limits = ParameterLimits::default();
        assert_eq!(limits.exposure.normalize("exposure", 12.34).unwrap(), 12.3);
        assert_eq!(limits.exposure.normalize("exposure", 1000.0).unwrap(), 1000.0);
        assert_eq!(limits.gain.normalize("gain", 49.6).unwrap(), 50.0);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let limits = ParameterLimits::default();
        match limits.gain.normalize("gain", 5000.0) {
            Err(CoreError::InvalidParameter {
                name,
                value,
                min,
                max,
            }) => {
                assert_eq!(name, "gain");
                assert_eq!(value, 5000.0);
                assert_eq!((min, max), (0.0, 240.0));
            }
            other => panic!("expected InvalidParameter, got {other:?}"),
        }
        assert!(limits.exposure.normalize("exposure", -0.5).is_err());
        assert!(limits.exposure.normalize("exposure", f64::NAN).is_err());
    }

    #[test]
    fn settings_split_per_channel() {
        let config = ConnectionConfig {
            ftp_port: 2121,
            ..ConnectionConfig::default()
        };
        let command = config.command_settings();
        let retrieval = config.retrieval_settings();
        assert_eq!(command.host, DEFAULT_HOST);
        assert_eq!(command.port, 23);
        assert_eq!(retrieval.port, 2121);
        assert_eq!(retrieval.locator, FrameLocator::File("image.bmp".into()));
    }
}
