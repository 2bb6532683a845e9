//! Command dispatch: bridges CLI args -> controller calls -> output formatting.

pub mod camera;
pub mod config_cmd;
pub mod stream;

use skycam_core::{CameraController, CoreError};

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::{self, CliError};

/// Per-invocation context shared by the camera handlers.
pub struct Ctx<'a> {
    pub controller: &'a CameraController,
    pub resolved: &'a Resolved,
    pub global: &'a GlobalOpts,
}

impl Ctx<'_> {
    /// Attach host/profile context to a core error.
    pub fn core(&self, err: CoreError) -> CliError {
        error::from_core(
            err,
            &self.resolved.connection.host,
            &self.resolved.profile_name,
        )
    }
}

/// Dispatch a camera-bound command. Connects first and always disconnects.
pub async fn dispatch(
    cmd: Command,
    controller: &CameraController,
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let ctx = Ctx {
        controller,
        resolved,
        global,
    };

    // Reject bad values before opening any connection
    let limits = resolved.connection.limits;
    match &cmd {
        Command::Exposure(args) => {
            limits
                .exposure
                .normalize("exposure", args.value)
                .map_err(|e| ctx.core(e))?;
        }
        Command::Gain(args) => {
            limits
                .gain
                .normalize("gain", args.value)
                .map_err(|e| ctx.core(e))?;
        }
        _ => {}
    }

    controller.connect().await.map_err(|e| ctx.core(e))?;

    let result = match cmd {
        Command::Status => camera::status(&ctx).await,
        Command::Info => camera::info(&ctx),
        Command::Exposure(args) => camera::exposure(&ctx, args.value).await,
        Command::Gain(args) => camera::gain(&ctx, args.value).await,
        Command::Send(args) => camera::send(&ctx, &args).await,
        Command::Capture(args) => stream::capture(&ctx, &args).await,
        Command::Stream(args) => stream::stream(&ctx, &args).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    };

    controller.disconnect().await;
    result
}
