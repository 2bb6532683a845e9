//! CLI configuration: thin wrapper around `skycam_config` shared types.
//!
//! Adds CLI-specific resolution that respects `GlobalOpts` flag overrides
//! (--host, --port, --timeout, ...).

use std::path::PathBuf;

use skycam_config::{Config, ConfigError, Profile};
use skycam_core::{ConnectionConfig, StreamOptions};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use skycam_config::{config_path, render_profile};

/// Everything a command needs from config + flags.
#[derive(Debug)]
pub struct Resolved {
    pub profile_name: String,
    pub profile: Profile,
    pub connection: ConnectionConfig,
    pub stream: StreamOptions,
}

/// Load the config file and apply flag overrides to the active profile.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = skycam_config::load_config()?;
    let (profile_name, mut profile) = active_profile(&cfg, global)?;

    // Flag > env > profile
    if let Some(ref host) = global.host {
        profile.host.clone_from(host);
    }
    if let Some(port) = global.port {
        profile.command_port = port;
    }
    if let Some(port) = global.ftp_port {
        profile.ftp_port = port;
    }
    if let Some(ref dialect) = global.dialect {
        profile.dialect.clone_from(dialect);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout_secs = Some(timeout);
    }

    let connection = skycam_config::profile_to_connection_config(&profile, &cfg.defaults)?;
    let stream = skycam_config::stream_options(&profile, &cfg.defaults)?;
    Ok(Resolved {
        profile_name,
        profile,
        connection,
        stream,
    })
}

/// Log directory from flags or config, without failing on a bad config:
/// logging is set up before any command runs.
pub fn log_dir(global: &GlobalOpts) -> Option<PathBuf> {
    global.log_dir.clone().or_else(|| {
        skycam_config::load_config()
            .ok()
            .and_then(|cfg| cfg.defaults.log_dir)
    })
}

fn active_profile(cfg: &Config, global: &GlobalOpts) -> Result<(String, Profile), CliError> {
    cfg.profile(global.profile.as_deref()).map_err(|err| match err {
        ConfigError::UnknownProfile { profile } => {
            let mut names: Vec<_> = cfg.profiles.keys().cloned().collect();
            names.sort();
            CliError::ProfileNotFound {
                name: profile,
                available: if names.is_empty() {
                    "(none)".into()
                } else {
                    names.join(", ")
                },
                path: config_path().display().to_string(),
            }
        }
        other => other.into(),
    })
}
