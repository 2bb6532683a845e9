//! Shared configuration for the skycam CLI.
//!
//! TOML profiles, password resolution (env + plaintext), and translation
//! to `skycam_core::ConnectionConfig` / `StreamOptions`. The CLI layers
//! its `GlobalOpts` overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use skycam_core::config::{
    DEFAULT_COMMAND_PORT, DEFAULT_FTP_PORT, DEFAULT_HOST, DEFAULT_USERNAME,
};
use skycam_core::{
    ConnectionConfig, Dialect, FrameLocator, ParameterLimits, ParameterRange, ReconnectPolicy,
    StreamOptions,
};

/// Environment variable consulted for the camera password.
pub const PASSWORD_ENV: &str = "SKYCAM_PASSWORD";

const DEFAULT_PROFILE: &str = "default";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found in config")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named camera profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some(DEFAULT_PROFILE.into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_interval")]
    pub stream_interval_ms: u64,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Directory for daily-rolling log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            stream_interval_ms: default_interval(),
            keep_alive_secs: default_keep_alive(),
            log_dir: None,
        }
    }
}

fn default_timeout() -> u64 {
    20
}
fn default_interval() -> u64 {
    2000
}
fn default_keep_alive() -> u64 {
    5
}

/// A named camera profile. Every field is optional in TOML.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Profile {
    pub host: String,

    /// Telnet command port.
    pub command_port: u16,

    pub ftp_port: u16,

    pub username: String,

    /// Password (plaintext; prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Override `defaults.timeout_secs`.
    pub timeout_secs: Option<u64>,

    /// `line` or `in-sight`.
    pub dialect: String,

    /// Single remote file overwritten on every capture.
    pub image_filename: Option<String>,

    /// Remote directory holding one file per capture. Takes the newest
    /// (greatest) name with `image_extension`.
    pub image_dir: Option<String>,

    pub image_extension: Option<String>,

    /// Remove each frame from the camera after download.
    pub delete_after_fetch: bool,

    /// Re-login to FTP after this long. `0` keeps sessions open.
    pub ftp_session_max_age_secs: Option<u64>,

    pub stream_interval_ms: Option<u64>,

    /// Local time of day (`HH:MM`) at which streaming stops.
    pub stop_time: Option<String>,

    pub reconnect_attempts: Option<u32>,

    pub reconnect_backoff_ms: Option<u64>,

    /// Override `defaults.keep_alive_secs`. `0` disables keep-alive.
    pub keep_alive_secs: Option<u64>,

    pub exposure: Option<RangeConfig>,

    pub gain: Option<RangeConfig>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            command_port: DEFAULT_COMMAND_PORT,
            ftp_port: DEFAULT_FTP_PORT,
            username: DEFAULT_USERNAME.into(),
            password: None,
            password_env: None,
            timeout_secs: None,
            dialect: Dialect::default().to_string(),
            image_filename: None,
            image_dir: None,
            image_extension: None,
            delete_after_fetch: false,
            ftp_session_max_age_secs: None,
            stream_interval_ms: None,
            stop_time: None,
            reconnect_attempts: None,
            reconnect_backoff_ms: None,
            keep_alive_secs: None,
            exposure: None,
            gain: None,
        }
    }
}

/// Inclusive bounds for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RangeConfig {
    pub min: f64,
    pub max: f64,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("rs", "skycam", "skycam").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("skycam");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` (missing files are fine) merged with `SKYCAM_`
/// environment variables. Nested keys use `__`, e.g.
/// `SKYCAM_PROFILES__LAB__HOST`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SKYCAM_").split("__").ignore(&["password"]));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist or is bad.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

impl Config {
    /// Look up `name`, falling back to the configured default profile.
    ///
    /// The `default` profile always exists: when absent from the file it
    /// is built from the built-in defaults.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or(DEFAULT_PROFILE);
        match self.profiles.get(name) {
            Some(profile) => Ok((name.to_owned(), profile.clone())),
            None if name == DEFAULT_PROFILE => Ok((name.to_owned(), Profile::default())),
            None => Err(ConfigError::UnknownProfile {
                profile: name.to_owned(),
            }),
        }
    }
}

/// Render a profile as TOML with the password redacted.
pub fn render_profile(profile: &Profile) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(&profile.redacted())?)
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the password: `password_env` → `SKYCAM_PASSWORD` → plaintext.
/// The camera's factory default is an empty password, so nothing
/// configured is not an error.
pub fn resolve_password(profile: &Profile) -> SecretString {
    resolve_password_with(profile, |name| std::env::var(name).ok())
}

fn resolve_password_with(
    profile: &Profile,
    lookup: impl Fn(&str) -> Option<String>,
) -> SecretString {
    profile
        .password_env
        .as_deref()
        .and_then(&lookup)
        .or_else(|| lookup(PASSWORD_ENV))
        .or_else(|| profile.password.clone())
        .map_or_else(|| SecretString::from(String::new()), SecretString::from)
}

// ── Translation to core types ───────────────────────────────────────

impl Profile {
    /// Copy with any plaintext password masked.
    pub fn redacted(&self) -> Self {
        Self {
            password: self.password.as_ref().map(|_| "********".into()),
            ..self.clone()
        }
    }

    pub fn dialect(&self) -> Result<Dialect, ConfigError> {
        self.dialect
            .parse()
            .map_err(|_| {
                invalid(
                    "dialect",
                    format!("expected 'line' or 'in-sight', got '{}'", self.dialect),
                )
            })
    }

    pub fn frame_locator(&self) -> Result<FrameLocator, ConfigError> {
        match (&self.image_filename, &self.image_dir) {
            (Some(_), Some(_)) => Err(invalid(
                "image_dir",
                "set either image_filename or image_dir, not both",
            )),
            (Some(name), None) => Ok(FrameLocator::File(name.clone())),
            (None, Some(dir)) => Ok(FrameLocator::Directory {
                path: dir.clone(),
                extension: self.image_extension.clone().unwrap_or_else(|| "bmp".into()),
            }),
            (None, None) => Ok(FrameLocator::default()),
        }
    }

    pub fn stop_time(&self) -> Result<Option<NaiveTime>, ConfigError> {
        self.stop_time.as_deref().map(parse_time_of_day).transpose()
    }

    fn limits(&self) -> Result<ParameterLimits, ConfigError> {
        let defaults = ParameterLimits::default();
        Ok(ParameterLimits {
            exposure: range("exposure", self.exposure, defaults.exposure)?,
            gain: range("gain", self.gain, defaults.gain)?,
        })
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, ConfigError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| invalid("stop_time", format!("expected HH:MM, got '{value}'")))
}

fn range(
    field: &str,
    configured: Option<RangeConfig>,
    default: ParameterRange,
) -> Result<ParameterRange, ConfigError> {
    let Some(RangeConfig { min, max }) = configured else {
        return Ok(default);
    };
    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(invalid(field, format!("bad range {min}..={max}")));
    }
    Ok(ParameterRange::new(min, max, default.decimals))
}

fn positive(field: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        Err(invalid(field, "must be greater than zero"))
    } else {
        Ok(value)
    }
}

/// Build a `ConnectionConfig` from a profile, no CLI flag overrides.
pub fn profile_to_connection_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<ConnectionConfig, ConfigError> {
    if profile.host.trim().is_empty() {
        return Err(invalid("host", "must not be empty"));
    }
    let timeout_secs = positive(
        "timeout_secs",
        profile.timeout_secs.unwrap_or(defaults.timeout_secs),
    )?;
    let base = ConnectionConfig::default();
    let reconnect = ReconnectPolicy {
        max_attempts: profile
            .reconnect_attempts
            .unwrap_or(base.reconnect.max_attempts),
        backoff: profile
            .reconnect_backoff_ms
            .map_or(base.reconnect.backoff, Duration::from_millis),
    };
    let ftp_session_max_age = match profile.ftp_session_max_age_secs {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => base.ftp_session_max_age,
    };

    Ok(ConnectionConfig {
        host: profile.host.trim().to_owned(),
        command_port: profile.command_port,
        ftp_port: profile.ftp_port,
        username: profile.username.clone(),
        password: resolve_password(profile),
        timeout: Duration::from_secs(timeout_secs),
        dialect: profile.dialect()?,
        frame_locator: profile.frame_locator()?,
        delete_after_fetch: profile.delete_after_fetch,
        ftp_session_max_age,
        keep_alive_interval: Duration::from_secs(
            profile.keep_alive_secs.unwrap_or(defaults.keep_alive_secs),
        ),
        limits: profile.limits()?,
        reconnect,
    })
}

/// Streaming parameters for a profile.
pub fn stream_options(profile: &Profile, defaults: &Defaults) -> Result<StreamOptions, ConfigError> {
    let interval_ms = positive(
        "stream_interval_ms",
        profile.stream_interval_ms.unwrap_or(defaults.stream_interval_ms),
    )?;
    Ok(StreamOptions {
        stop_at: profile.stop_time()?,
        ..StreamOptions::with_interval(Duration::from_millis(interval_ms))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.toml")).unwrap();

        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "default");
        assert_eq!(profile, Profile::default());
        assert_eq!(config.defaults, Defaults::default());
    }

    #[test]
    fn profile_fields_map_onto_connection_config() {
        let file = write_config(
            r#"
default_profile = "lab"

[defaults]
timeout_secs = 7

[profiles.lab]
host = "10.0.0.5"
command_port = 2323
dialect = "in-sight"
image_dir = "/images/"
image_extension = "jpg"
delete_after_fetch = true
ftp_session_max_age_secs = 0
keep_alive_secs = 0
reconnect_attempts = 5
reconnect_backoff_ms = 250
gain = { min = 1.0, max = 100.0 }
"#,
        );
        let config = load_config_from(file.path()).unwrap();
        let (name, profile) = config.profile(None).unwrap();
        let conn = profile_to_connection_config(&profile, &config.defaults).unwrap();

        assert_eq!(name, "lab");
        assert_eq!(conn.host, "10.0.0.5");
        assert_eq!(conn.command_port, 2323);
        assert_eq!(conn.ftp_port, 21);
        assert_eq!(conn.timeout, Duration::from_secs(7));
        assert_eq!(conn.dialect, Dialect::InSight);
        assert_eq!(
            conn.frame_locator,
            FrameLocator::Directory {
                path: "/images/".into(),
                extension: "jpg".into(),
            }
        );
        assert!(conn.delete_after_fetch);
        assert_eq!(conn.ftp_session_max_age, None);
        assert_eq!(conn.keep_alive_interval, Duration::ZERO);
        assert_eq!(conn.reconnect.max_attempts, 5);
        assert_eq!(conn.reconnect.backoff, Duration::from_millis(250));
        assert_eq!((conn.limits.gain.min, conn.limits.gain.max), (1.0, 100.0));
        assert_eq!(conn.limits.exposure, ParameterLimits::default().exposure);
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let config = Config::default();
        assert!(matches!(
            config.profile(Some("garage")),
            Err(ConfigError::UnknownProfile { profile }) if profile == "garage"
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let defaults = Defaults::default();
        let bad_dialect = Profile {
            dialect: "telnet".into(),
            ..Profile::default()
        };
        let both_locators = Profile {
            image_filename: Some("a.bmp".into()),
            image_dir: Some("/img".into()),
            ..Profile::default()
        };
        let inverted = Profile {
            exposure: Some(RangeConfig { min: 10.0, max: 1.0 }),
            ..Profile::default()
        };
        let zero_timeout = Profile {
            timeout_secs: Some(0),
            ..Profile::default()
        };

        for profile in [bad_dialect, both_locators, inverted, zero_timeout] {
            assert!(matches!(
                profile_to_connection_config(&profile, &defaults),
                Err(ConfigError::Validation { .. })
            ));
        }
    }

    #[test]
    fn malformed_toml_is_a_load_error() {
        let file = write_config("[profiles.lab\nhost = ");
        assert!(matches!(
            load_config_from(file.path()),
            Err(ConfigError::Figment(_))
        ));
    }

    #[test]
    fn password_resolution_order() {
        let profile = Profile {
            password: Some("plain".into()),
            password_env: Some("LAB_CAMERA_PW".into()),
            ..Profile::default()
        };

        let from_profile_env = resolve_password_with(&profile, |name| {
            (name == "LAB_CAMERA_PW").then(|| "from-env".to_owned())
        });
        let from_global_env = resolve_password_with(&profile, |name| {
            (name == PASSWORD_ENV).then(|| "global".to_owned())
        });
        let plaintext = resolve_password_with(&profile, |_| None);
        let empty = resolve_password_with(&Profile::default(), |_| None);

        assert_eq!(from_profile_env.expose_secret(), "from-env");
        assert_eq!(from_global_env.expose_secret(), "global");
        assert_eq!(plaintext.expose_secret(), "plain");
        assert_eq!(empty.expose_secret(), "");
    }

    #[test]
    fn stream_options_with_stop_time() {
        let profile = Profile {
            stream_interval_ms: Some(500),
            stop_time: Some("17:30".into()),
            ..Profile::default()
        };
        let options = stream_options(&profile, &Defaults::default()).unwrap();

        assert_eq!(options.interval, Duration::from_millis(500));
        assert_eq!(options.stop_at, NaiveTime::from_hms_opt(17, 30, 0));
        assert!(parse_time_of_day("25:00").is_err());
        assert!(
            stream_options(
                &Profile {
                    stream_interval_ms: Some(0),
                    ..Profile::default()
                },
                &Defaults::default()
            )
            .is_err()
        );
    }

    #[test]
    fn rendered_profile_hides_password() {
        let profile = Profile {
            password: Some("hunter2".into()),
            ..Profile::default()
        };
        let rendered = render_profile(&profile).unwrap();

        assert!(rendered.contains("host = \"100.1.9.31\""));
        assert!(!rendered.contains("hunter2"));
    }
}
