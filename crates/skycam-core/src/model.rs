// ── Domain model ──
//
// Camera state, frames and the values exchanged with consumers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CoreError;

/// Lifecycle state of a [`CameraController`](crate::CameraController).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CameraState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    /// Unrecoverable channel failure; only `reset()` leaves this state.
    Faulted,
}

impl CameraState {
    /// Both channels are expected to be usable.
    pub fn is_online(self) -> bool {
        matches!(self, Self::Connected | Self::Streaming)
    }
}

/// One captured image. The bytes are opaque to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameImage {
    /// Strictly increasing within a streaming run, starting at 0.
    pub sequence: u64,
    /// Remote file name.
    pub name: String,
    pub bytes: Bytes,
    pub captured_at: DateTime<Utc>,
}

impl FrameImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Exposure and gain as reported by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraStatus {
    /// Exposure in milliseconds.
    pub exposure: f64,
    pub gain: f64,
}

impl CameraStatus {
    /// Parse a `KEY=VALUE` status payload (`EXPOSURE=120 GAIN=50`).
    /// Keys are case-insensitive; unknown keys are ignored.
    pub fn parse(payload: &str) -> Result<Self, CoreError> {
        let mut exposure = None;
        let mut gain = None;
        for pair in payload.split_whitespace() {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let slot = match key.to_ascii_uppercase().as_str() {
                "EXPOSURE" => &mut exposure,
                "GAIN" => &mut gain,
                _ => continue,
            };
            *slot = Some(parse_number(value, payload)?);
        }
        match (exposure, gain) {
            (Some(exposure), Some(gain)) => Ok(Self { exposure, gain }),
            _ => Err(CoreError::Protocol {
                raw: payload.to_owned(),
            }),
        }
    }
}

pub(crate) fn parse_number(value: &str, raw: &str) -> Result<f64, CoreError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CoreError::Protocol {
            raw: raw.to_owned(),
        })
}

/// Desired exposure/gain pair, applied together.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExposureGainSettings {
    pub exposure: Option<f64>,
    pub gain: Option<f64>,
}

/// Counters for the current streaming run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StreamStats {
    /// Frames handed to observers.
    pub delivered: u64,
    /// Frames overwritten before the consumer took them.
    pub dropped: u64,
    /// Failed cycles.
    pub errors: u64,
    /// Cycles that found no new frame.
    pub empty_cycles: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_payload_parses() {
        assert_eq!(
            CameraStatus::parse("EXPOSURE=120 GAIN=50").unwrap(),
            CameraStatus {
                exposure: 120.0,
                gain: 50.0
            }
        );
        assert_eq!(
            CameraStatus::parse("gain=3 MODE=run exposure=12.5").unwrap(),
            CameraStatus {
                exposure: 12.5,
                gain: 3.0
            }
        );
    }

    #[test]
    fn incomplete_status_is_protocol_error() {
        for raw in ["", "EXPOSURE=120", "EXPOSURE=abc GAIN=1", "EXPOSURE=NaN GAIN=1"] {
            assert!(
                matches!(CameraStatus::parse(raw), Err(CoreError::Protocol { .. })),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn state_names() {
        assert_eq!(CameraState::Streaming.to_string(), "streaming");
        assert_eq!("FAULTED".parse::<CameraState>().unwrap(), CameraState::Faulted);
        assert!(CameraState::Connected.is_online());
        assert!(!CameraState::Faulted.is_online());
    }
}
