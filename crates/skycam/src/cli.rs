//! Clap derive structures for the `skycam` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// skycam -- drive an In-Sight camera from the command line
#[derive(Debug, Parser)]
#[command(
    name = "skycam",
    version,
    about = "Control an In-Sight camera and stream its frames",
    long_about = "Connects to a Cognex In-Sight camera over its Telnet command port\n\
        and FTP file store. Adjust exposure and gain, capture single frames,\n\
        or stream frames to disk at a fixed interval.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Camera profile to use
    #[arg(long, short = 'p', env = "SKYCAM_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Camera host or IP (overrides profile)
    #[arg(long, short = 'H', env = "SKYCAM_HOST", global = true)]
    pub host: Option<String>,

    /// Telnet command port (overrides profile)
    #[arg(long, env = "SKYCAM_PORT", global = true)]
    pub port: Option<u16>,

    /// FTP port (overrides profile)
    #[arg(long, env = "SKYCAM_FTP_PORT", global = true)]
    pub ftp_port: Option<u16>,

    /// Command dialect: line or in-sight (overrides profile)
    #[arg(long, global = true)]
    pub dialect: Option<String>,

    /// Network timeout in seconds (overrides profile)
    #[arg(long, short = 't', env = "SKYCAM_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Write daily-rolling log files to this directory
    #[arg(long, env = "SKYCAM_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show current exposure and gain
    #[command(alias = "st")]
    Status,

    /// Show camera identity (banner, serial number)
    Info,

    /// Set exposure in milliseconds
    #[command(alias = "exp")]
    Exposure(ValueArgs),

    /// Set sensor gain
    Gain(ValueArgs),

    /// Capture one frame and save it
    #[command(alias = "snap")]
    Capture(CaptureArgs),

    /// Capture frames at a fixed interval until stopped
    Stream(StreamArgs),

    /// Send a raw command and print the reply
    Send(SendArgs),

    /// Inspect configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command Arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ValueArgs {
    /// New value
    #[arg(allow_negative_numbers = true)]
    pub value: f64,
}

#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Output file (defaults to the camera's file name)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct StreamArgs {
    /// Milliseconds between captures (overrides profile)
    #[arg(long, short = 'i')]
    pub interval_ms: Option<u64>,

    /// Stop after this many frames
    #[arg(long, short = 'n')]
    pub count: Option<u64>,

    /// Directory to write frames into (not written when omitted)
    #[arg(long, short = 'd')]
    pub output_dir: Option<PathBuf>,

    /// Stop at this local time of day, HH:MM (overrides profile)
    #[arg(long)]
    pub stop_time: Option<String>,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Command words, e.g. `GET STATUS` or `SE8`
    #[arg(required = true, num_args = 1..)]
    pub words: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display the active profile (password redacted)
    Show,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
