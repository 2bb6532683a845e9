//! Output formatting: text or JSON.
//!
//! Text views are pre-formatted by each handler; `--json` serializes the
//! underlying data with serde instead.

use std::io::{self, Write};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Render `data` as pretty JSON when `--json` is set, otherwise as the
/// handler's text view.
pub fn render<T>(global: &GlobalOpts, data: &T, text: impl FnOnce(&T) -> String) -> Result<String, CliError>
where
    T: serde::Serialize + ?Sized,
{
    if global.json {
        Ok(serde_json::to_string_pretty(data)?)
    } else {
        Ok(text(data))
    }
}

/// One JSON object per line, for streams.
pub fn render_line<T>(global: &GlobalOpts, data: &T, text: impl FnOnce(&T) -> String) -> Result<String, CliError>
where
    T: serde::Serialize + ?Sized,
{
    if global.json {
        Ok(serde_json::to_string(data)?)
    } else {
        Ok(text(data))
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}
