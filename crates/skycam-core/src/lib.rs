//! Session and streaming coordination for In-Sight 8502C style cameras.
//!
//! The camera is driven over two channels: a line-oriented Telnet command
//! channel (capture, exposure, gain) and an FTP file store that holds the
//! most recent image. This crate ties both together:
//!
//! - **[`CameraController`]**: Owns both channels and the lifecycle state
//!   machine (`Disconnected → Connecting → Connected ⇄ Streaming`, with
//!   `Faulted` on unrecoverable errors). Validates parameters before any
//!   I/O and exposes one-shot capture.
//!
//! - **[`StreamingLoop`]**: Periodic capture+fetch worker. A polling task
//!   hands frames to a delivery task through a capacity-1 latest-wins slot,
//!   so a slow consumer drops frames instead of delaying the camera.
//!
//! - **[`CameraObserver`]**: Callback trait for frames, per-cycle errors
//!   and state changes. The latest frame is also available by polling
//!   [`CameraController::latest_frame`].
//!
//! - **[`ConnectionConfig`]**: Immutable runtime settings: endpoints,
//!   credentials, timeouts, parameter limits and reconnect policy.

pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod observer;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{
    ConnectionConfig, ParameterLimits, ParameterRange, ReconnectPolicy, StreamOptions,
};
pub use controller::CameraController;
pub use error::CoreError;
pub use model::{CameraState, CameraStatus, ExposureGainSettings, FrameImage, StreamStats};
pub use observer::{CameraObserver, SubscriptionId};
pub use stream::{FrameSource, LoopExit, StreamHandle, StreamingLoop};

// ── Protocol re-exports ─────────────────────────────────────────────
pub use skycam_api::{
    CameraInfo, CommandRequest, CommandResponse, Dialect, FrameLocator, RemoteFrame,
    ResponseStatus,
};
