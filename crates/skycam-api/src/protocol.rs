//! Command protocol: request/response types and line dialects.
//!
//! Requests are a verb plus ordered arguments, written as one line. Two
//! dialects describe how that line and the camera's reply are framed:
//!
//! - [`Dialect::Line`]: `VERB arg...\n`, answered by a single
//!   `OK[ payload]` / `ERR[ payload]` line.
//! - [`Dialect::InSight`]: In-Sight native mode. Canonical verbs are
//!   translated to native commands (`CAPTURE` → `SE8`, ...), lines end in
//!   CR/LF, and the reply starts with a numeric status line (`1` success,
//!   `0` unrecognized, `-1`/`-2` failed). Value queries (`GV…`) carry one
//!   data line after the status.
//!
//! ```
//! use skycam_api::protocol::{CommandRequest, CommandResponse, Dialect, ResponseStatus};
//!
//! let req = CommandRequest::new("SET EXPOSURE").arg("120");
//! assert_eq!(Dialect::Line.encode_frame(&req).unwrap(), "SET EXPOSURE 120\n");
//!
//! let resp = CommandResponse::parse_line("OK 120\n").unwrap();
//! assert_eq!(resp.status, ResponseStatus::Ok);
//! assert_eq!(resp.payload, "120");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Error;

pub const VERB_CAPTURE: &str = "CAPTURE";
pub const VERB_SET_EXPOSURE: &str = "SET EXPOSURE";
pub const VERB_SET_GAIN: &str = "SET GAIN";
pub const VERB_GET_STATUS: &str = "GET STATUS";
pub const VERB_GET_EXPOSURE: &str = "GET EXPOSURE";
pub const VERB_GET_GAIN: &str = "GET GAIN";
pub const VERB_IDENTIFY: &str = "IDENTIFY";

// ── CommandRequest ───────────────────────────────────────────────────

/// A single command: verb plus ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub verb: String,
    pub arguments: Vec<String>,
}

impl CommandRequest {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            arguments: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn capture() -> Self {
        Self::new(VERB_CAPTURE)
    }

    pub fn set_exposure(value: f64) -> Self {
        Self::new(VERB_SET_EXPOSURE).arg(format_numeric(value))
    }

    pub fn set_gain(value: f64) -> Self {
        Self::new(VERB_SET_GAIN).arg(format_numeric(value))
    }

    pub fn get_status() -> Self {
        Self::new(VERB_GET_STATUS)
    }

    pub fn get_exposure() -> Self {
        Self::new(VERB_GET_EXPOSURE)
    }

    pub fn get_gain() -> Self {
        Self::new(VERB_GET_GAIN)
    }

    pub fn identify() -> Self {
        Self::new(VERB_IDENTIFY)
    }

    /// Verb and arguments joined by single spaces, no terminator.
    pub fn to_line(&self) -> String {
        let mut line = self.verb.trim().to_owned();
        for argument in &self.arguments {
            line.push(' ');
            line.push_str(argument.trim());
        }
        line
    }
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// Render a numeric argument. Whole numbers carry no fractional part
/// (`120`, not `120.0`).
pub fn format_numeric(value: f64) -> String {
    value.to_string()
}

// ── CommandResponse ──────────────────────────────────────────────────

/// Outcome class of a command reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
    Timeout,
}

/// A parsed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: ResponseStatus,
    pub payload: String,
}

impl CommandResponse {
    pub fn ok(payload: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            payload: payload.into(),
        }
    }

    pub fn error(payload: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            payload: payload.into(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: ResponseStatus::Timeout,
            payload: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Parse a [`Dialect::Line`] reply line (`OK 120`, `ERR invalid`).
    pub fn parse_line(line: &str) -> Result<Self, Error> {
        let trimmed = line.trim();
        let (token, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((token, rest)) => (token, rest.trim()),
            None => (trimmed, ""),
        };
        match token {
            "OK" => Ok(Self::ok(rest)),
            "ERR" => Ok(Self::error(rest)),
            _ => Err(Error::Protocol {
                raw: line.to_owned(),
            }),
        }
    }
}

// ── Dialect ──────────────────────────────────────────────────────────

/// Line framing spoken by the camera's command port.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Dialect {
    /// Generic `OK`/`ERR` line protocol.
    #[default]
    Line,
    /// In-Sight native mode (numeric status replies).
    #[strum(to_string = "in-sight", serialize = "insight", serialize = "native")]
    InSight,
}

impl Dialect {
    /// Line terminator appended to every request.
    pub fn terminator(self) -> &'static str {
        match self {
            Self::Line => "\n",
            Self::InSight => "\r\n",
        }
    }

    /// Translate and validate a request into its wire line (no terminator).
    pub fn encode(self, request: &CommandRequest) -> Result<String, Error> {
        let verb = request.verb.trim();
        if verb.is_empty() {
            return Err(Error::InvalidCommand("empty verb".into()));
        }
        let line = match self {
            Self::Line => request.to_line(),
            Self::InSight => {
                let upper = verb.to_ascii_uppercase();
                let native = match upper.as_str() {
                    VERB_CAPTURE => "SE8",
                    VERB_SET_EXPOSURE => "SFA005",
                    VERB_SET_GAIN => "SIB005",
                    VERB_GET_EXPOSURE => "GVA005",
                    VERB_GET_GAIN => "GVB005",
                    VERB_IDENTIFY => "GI",
                    other => other,
                };
                let line = CommandRequest {
                    verb: native.to_owned(),
                    arguments: request.arguments.clone(),
                }
                .to_line();
                validate_native(&line)?;
                line
            }
        };
        if line.contains(['\r', '\n']) {
            return Err(Error::InvalidCommand(format!(
                "line breaks are not allowed: {line:?}"
            )));
        }
        Ok(line)
    }

    /// Wire line plus terminator, exactly as written to the socket.
    pub fn encode_frame(self, request: &CommandRequest) -> Result<String, Error> {
        let mut line = self.encode(request)?;
        line.push_str(self.terminator());
        Ok(line)
    }

    /// Number of data lines that follow a successful status line for the
    /// given wire line.
    pub fn data_lines(self, wire_line: &str) -> usize {
        match self {
            Self::Line => 0,
            Self::InSight => {
                let head = wire_line.split_whitespace().next().unwrap_or_default();
                if head.starts_with("GV") {
                    1
                } else if head == "GI" {
                    2
                } else {
                    0
                }
            }
        }
    }

    /// Whether the status line reports success (data lines follow).
    pub fn is_success_status(self, status_line: &str) -> bool {
        match self {
            Self::Line => status_line.trim_start().starts_with("OK"),
            Self::InSight => status_line.trim() == "1",
        }
    }

    /// Decode a status line and its data lines into a response.
    pub fn decode(self, status_line: &str, data: &[String]) -> Result<CommandResponse, Error> {
        match self {
            Self::Line => CommandResponse::parse_line(status_line),
            Self::InSight => match status_line.trim() {
                "1" => Ok(CommandResponse::ok(data.join("\n"))),
                "0" => Ok(CommandResponse::error("unrecognized command")),
                status @ ("-1" | "-2") => Ok(CommandResponse::error(format!(
                    "command failed (status {status})"
                ))),
                _ => Err(Error::Protocol {
                    raw: status_line.to_owned(),
                }),
            },
        }
    }
}

/// Native mode sanity checks: at least two characters, and `GV` reads must
/// address a cell as `GV<column><3-digit row>` (e.g. `GVA005`).
fn validate_native(line: &str) -> Result<(), Error> {
    let head = line.split_whitespace().next().unwrap_or_default();
    if head.len() < 2 {
        return Err(Error::InvalidCommand(format!(
            "'{line}' (minimum 2 characters)"
        )));
    }
    if let Some(cell) = head.strip_prefix("GV") {
        let mut chars = cell.chars();
        let column_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
        let row: Vec<char> = chars.collect();
        if !column_ok || row.len() != 3 || !row.iter().all(char::is_ascii_digit) {
            return Err(Error::InvalidCommand(format!(
                "'{line}' (expected GV<column><row>, e.g. GVA005)"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn set_exposure_encodes_to_single_line() {
        let req = CommandRequest::new("SET EXPOSURE").arg("120");
        assert_eq!(Dialect::Line.encode_frame(&req).unwrap(), "SET EXPOSURE 120\n");
        assert_eq!(
            Dialect::Line
                .encode_frame(&CommandRequest::set_exposure(120.0))
                .unwrap(),
            "SET EXPOSURE 120\n"
        );
    }

    #[test]
    fn ok_reply_parses_payload() {
        assert_eq!(
            CommandResponse::parse_line("OK 120\n").unwrap(),
            CommandResponse::ok("120")
        );
        assert_eq!(CommandResponse::parse_line("OK").unwrap(), CommandResponse::ok(""));
        assert_eq!(
            CommandResponse::parse_line("ERR invalid\r\n").unwrap(),
            CommandResponse::error("invalid")
        );
    }

    #[test]
    fn malformed_reply_carries_raw_text() {
        for raw in ["", "   ", "MAYBE 3", "ok 1"] {
            match CommandResponse::parse_line(raw) {
                Err(Error::Protocol { raw: got }) => assert_eq!(got, raw),
                other => panic!("expected protocol error for {raw:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn numeric_formatting() {
        assert_eq!(format_numeric(120.0), "120");
        assert_eq!(format_numeric(12.5), "12.5");
        assert_eq!(format_numeric(0.0), "0");
    }

    #[test]
    fn in_sight_translates_canonical_verbs() {
        let d = Dialect::InSight;
        assert_eq!(d.encode(&CommandRequest::capture()).unwrap(), "SE8");
        assert_eq!(d.encode(&CommandRequest::set_exposure(12.5)).unwrap(), "SFA005 12.5");
        assert_eq!(d.encode(&CommandRequest::set_gain(50.0)).unwrap(), "SIB005 50");
        assert_eq!(d.encode(&CommandRequest::get_exposure()).unwrap(), "GVA005");
        assert_eq!(d.encode(&CommandRequest::identify()).unwrap(), "GI");
        assert_eq!(d.encode_frame(&CommandRequest::capture()).unwrap(), "SE8\r\n");
        assert_eq!(d.encode(&CommandRequest::new("gvc010")).unwrap(), "GVC010");
    }

    #[test]
    fn in_sight_rejects_malformed_native_commands() {
        let d = Dialect::InSight;
        assert!(d.encode(&CommandRequest::new("G")).is_err());
        assert!(d.encode(&CommandRequest::new("GV5005")).is_err());
        assert!(d.encode(&CommandRequest::new("GVA05")).is_err());
        assert!(d.encode(&CommandRequest::new("  ")).is_err());
        assert!(Dialect::Line.encode(&CommandRequest::new("")).is_err());
    }

    #[test]
    fn in_sight_status_decoding() {
        let d = Dialect::InSight;
        assert_eq!(
            d.decode("1", &["12.5".to_owned()]).unwrap(),
            CommandResponse::ok("12.5")
        );
        assert_eq!(d.decode("0", &[]).unwrap().status, ResponseStatus::Error);
        assert_eq!(
            d.decode("-2", &[]).unwrap(),
            CommandResponse::error("command failed (status -2)")
        );
        assert!(matches!(d.decode("garbage", &[]), Err(Error::Protocol { .. })));
        assert_eq!(d.data_lines("GVB005"), 1);
        assert_eq!(d.data_lines("GI"), 2);
        assert_eq!(d.data_lines("SE8"), 0);
        assert!(d.is_success_status("1"));
        assert!(!d.is_success_status("-1"));
    }

    #[test]
    fn dialect_names_round_trip() {
        assert_eq!("line".parse::<Dialect>().unwrap(), Dialect::Line);
        assert_eq!("In-Sight".parse::<Dialect>().unwrap(), Dialect::InSight);
        assert_eq!("native".parse::<Dialect>().unwrap(), Dialect::InSight);
        assert!("telnet".parse::<Dialect>().is_err());
        assert_eq!(Dialect::InSight.to_string(), "in-sight");
    }
}
