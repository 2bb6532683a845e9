//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let path = config::config_path().display().to_string();
            let out = output::render(global, &path, String::clone)?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let resolved = config::resolve(global)?;
            let out = if global.json {
                serde_json::to_string_pretty(&resolved.profile.redacted())?
            } else {
                format!(
                    "# profile: {}\n{}",
                    resolved.profile_name,
                    config::render_profile(&resolved.profile)?
                )
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
