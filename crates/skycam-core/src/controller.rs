// ── Camera controller ──
//
// Facade over one command channel, one retrieval channel and at most one
// streaming run. Lifecycle operations are serialized by the lifecycle
// mutex; everything else only takes the per-channel locks, so a command
// can be sent while a frame is being fetched.

use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use skycam_api::{
    CameraInfo, CommandChannel, CommandRequest, CommandResponse, Dialect, RemoteFrame,
    ResponseStatus, RetrievalChannel,
};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{ConnectionConfig, ReconnectPolicy, StreamOptions};
use crate::error::CoreError;
use crate::model::{
    CameraState, CameraStatus, ExposureGainSettings, FrameImage, StreamStats, parse_number,
};
use crate::observer::{CameraObserver, ObserverSet, SubscriptionId};
use crate::stream::{FrameSource, LoopExit, StreamCounters, StreamHandle, StreamingLoop};

const CYCLE_TIMEOUT_FACTOR: u32 = 3;

// ── CameraController ─────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Owns the camera's two
/// network channels and the streaming worker, and is the only place the
/// [`CameraState`] changes.
#[derive(Clone)]
pub struct CameraController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ConnectionConfig,
    command: Arc<CommandChannel>,
    retrieval: Arc<RetrievalChannel>,
    state: watch::Sender<CameraState>,
    observers: ObserverSet,
    latest: ArcSwapOption<FrameImage>,
    info: ArcSwapOption<CameraInfo>,
    counters: ArcSwapOption<StreamCounters>,
    /// Root token; every background task runs on a child of it.
    cancel: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    stream: Option<StreamHandle>,
    /// Incremented per streaming run so a late exit hook cannot reap a
    /// newer run.
    run: u64,
    keep_alive: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl CameraController {
    /// Create a disconnected controller. No I/O happens until
    /// [`connect`](Self::connect).
    pub fn new(config: ConnectionConfig) -> Self {
        let command = Arc::new(CommandChannel::new(config.command_settings()));
        let retrieval = Arc::new(RetrievalChannel::new(config.retrieval_settings()));
        let (state, _) = watch::channel(CameraState::Disconnected);
        Self {
            inner: Arc::new(ControllerInner {
                config,
                command,
                retrieval,
                state,
                observers: ObserverSet::default(),
                latest: ArcSwapOption::empty(),
                info: ArcSwapOption::empty(),
                counters: ArcSwapOption::empty(),
                cancel: CancellationToken::new(),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    // ── State & consumers ────────────────────────────────────────────

    pub fn state(&self) -> CameraState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<CameraState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self, observer: Arc<dyn CameraObserver>) -> SubscriptionId {
        self.inner.observers.subscribe(observer)
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    /// Most recent frame from streaming or `capture_once`.
    pub fn latest_frame(&self) -> Option<Arc<FrameImage>> {
        self.inner.latest.load_full()
    }

    /// Counters of the current (or last) streaming run.
    pub fn stream_stats(&self) -> StreamStats {
        self.inner
            .counters
            .load()
            .as_ref()
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Identity reported during the last login.
    pub fn camera_info(&self) -> Option<CameraInfo> {
        self.inner.info.load_full().map(|info| (*info).clone())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open both channels: `Disconnected → Connecting → Connected`.
    ///
    /// On failure both channels are closed, the controller is `Faulted`
    /// and the error is returned.
    pub async fn connect(&self) -> Result<CameraInfo, CoreError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.require("connect", &[CameraState::Disconnected])?;
        self.inner.set_state(CameraState::Connecting);

        let opened = tokio::try_join!(self.inner.command.connect(), self.inner.retrieval.connect());
        match opened {
            Ok((info, ())) => {
                info!(
                    host = %self.inner.config.host,
                    serial = info.serial_number.as_deref().unwrap_or("-"),
                    "camera connected"
                );
                self.inner.info.store(Some(Arc::new(info.clone())));
                lifecycle.keep_alive = self.spawn_keep_alive();
                self.inner.set_state(CameraState::Connected);
                Ok(info)
            }
            Err(e) => {
                warn!(error = %e, "camera connect failed");
                self.inner.command.close().await;
                self.inner.retrieval.close().await;
                self.inner.set_state(CameraState::Faulted);
                Err(e.into())
            }
        }
    }

    /// Stop streaming, close both channels, and return to `Disconnected`.
    /// Valid in every state.
    pub async fn disconnect(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.teardown(&mut lifecycle).await;
        self.inner.set_state(CameraState::Disconnected);
        info!("camera disconnected");
    }

    /// Leave `Faulted`, closing anything still open.
    pub async fn reset(&self) -> Result<(), CoreError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.require("reset", &[CameraState::Faulted])?;
        self.teardown(&mut lifecycle).await;
        self.inner.set_state(CameraState::Disconnected);
        Ok(())
    }

    // ── Streaming ────────────────────────────────────────────────────

    /// `Connected → Streaming`. Frames go to observers and
    /// [`latest_frame`](Self::latest_frame).
    pub async fn start_streaming(&self, options: StreamOptions) -> Result<(), CoreError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.require("start streaming", &[CameraState::Connected])?;

        let options = StreamOptions {
            cycle_timeout: options
                .cycle_timeout
                .or(Some(self.inner.config.timeout * CYCLE_TIMEOUT_FACTOR)),
            ..options
        };
        lifecycle.run += 1;
        let source = Arc::new(ChannelSource {
            command: Arc::clone(&self.inner.command),
            retrieval: Arc::clone(&self.inner.retrieval),
            policy: self.inner.config.reconnect,
            controller: Arc::downgrade(&self.inner),
            run: lifecycle.run,
        });

        let frames = Arc::downgrade(&self.inner);
        let errors = Arc::downgrade(&self.inner);
        let handle = StreamingLoop::start(
            source,
            options,
            self.inner.cancel.child_token(),
            move |frame| {
                if let Some(inner) = frames.upgrade() {
                    inner.latest.store(Some(Arc::clone(&frame)));
                    inner.observers.frame(&frame);
                }
            },
            move |error| {
                if let Some(inner) = errors.upgrade() {
                    inner.observers.error(&error);
                }
            },
        )?;
        self.inner.counters.store(Some(handle.counters()));
        lifecycle.stream = Some(handle);
        self.inner.set_state(CameraState::Streaming);
        Ok(())
    }

    /// `Streaming → Connected`. Returns once the worker has stopped; no
    /// frame or error callback starts afterwards.
    pub async fn stop_streaming(&self) -> Result<StreamStats, CoreError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.require("stop streaming", &[CameraState::Streaming])?;
        let stats = match lifecycle.stream.take() {
            Some(handle) => handle.stop().await,
            None => StreamStats::default(),
        };
        self.inner
            .transition(&[CameraState::Streaming], CameraState::Connected);
        Ok(stats)
    }

    pub async fn pause_streaming(&self) -> Result<(), CoreError> {
        let lifecycle = self.inner.lifecycle.lock().await;
        self.require("pause streaming", &[CameraState::Streaming])?;
        if let Some(handle) = lifecycle.stream.as_ref() {
            handle.pause();
            info!("streaming paused");
        }
        Ok(())
    }

    pub async fn resume_streaming(&self) -> Result<(), CoreError> {
        let lifecycle = self.inner.lifecycle.lock().await;
        self.require("resume streaming", &[CameraState::Streaming])?;
        if let Some(handle) = lifecycle.stream.as_ref() {
            handle.resume();
            info!("streaming resumed");
        }
        Ok(())
    }

    pub async fn is_paused(&self) -> bool {
        self.inner
            .lifecycle
            .lock()
            .await
            .stream
            .as_ref()
            .is_some_and(StreamHandle::is_paused)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Validate, send and return the exposure (ms) the camera confirmed.
    pub async fn set_exposure(&self, value: f64) -> Result<f64, CoreError> {
        self.require("set exposure", ONLINE)?;
        let value = self.inner.config.limits.exposure.normalize("exposure", value)?;
        let response = self.send_checked(&CommandRequest::set_exposure(value)).await?;
        Ok(confirmed(&response, value))
    }

    /// Validate, send and return the gain the camera confirmed.
    pub async fn set_gain(&self, value: f64) -> Result<f64, CoreError> {
        self.require("set gain", ONLINE)?;
        let value = self.inner.config.limits.gain.normalize("gain", value)?;
        let response = self.send_checked(&CommandRequest::set_gain(value)).await?;
        Ok(confirmed(&response, value))
    }

    /// Apply whichever of exposure and gain are set. Everything is
    /// validated before the first command is sent.
    pub async fn apply_settings(
        &self,
        settings: ExposureGainSettings,
    ) -> Result<ExposureGainSettings, CoreError> {
        let limits = self.inner.config.limits;
        if let Some(exposure) = settings.exposure {
            limits.exposure.normalize("exposure", exposure)?;
        }
        if let Some(gain) = settings.gain {
            limits.gain.normalize("gain", gain)?;
        }
        let mut applied = ExposureGainSettings::default();
        if let Some(exposure) = settings.exposure {
            applied.exposure = Some(self.set_exposure(exposure).await?);
        }
        if let Some(gain) = settings.gain {
            applied.gain = Some(self.set_gain(gain).await?);
        }
        Ok(applied)
    }

    /// Current exposure and gain as reported by the camera.
    pub async fn status(&self) -> Result<CameraStatus, CoreError> {
        self.require("read status", ONLINE)?;
        match self.inner.config.dialect {
            Dialect::Line => {
                let response = self.send_checked(&CommandRequest::get_status()).await?;
                CameraStatus::parse(&response.payload)
            }
            Dialect::InSight => {
                let exposure = self.send_checked(&CommandRequest::get_exposure()).await?;
                let gain = self.send_checked(&CommandRequest::get_gain()).await?;
                Ok(CameraStatus {
                    exposure: parse_number(&exposure.payload, &exposure.payload)?,
                    gain: parse_number(&gain.payload, &gain.payload)?,
                })
            }
        }
    }

    /// Send an arbitrary request. Camera rejections and timeouts come back
    /// as the response status rather than as errors.
    pub async fn command(&self, request: &CommandRequest) -> Result<CommandResponse, CoreError> {
        self.require("send command", ONLINE)?;
        self.inner
            .command
            .send(request)
            .await
            .map_err(|e| self.inner.channel_failed(e))
    }

    /// One capture + fetch outside the streaming loop. The frame has
    /// sequence 0; `None` means the camera produced nothing new.
    pub async fn capture_once(&self) -> Result<Option<Arc<FrameImage>>, CoreError> {
        self.require("capture", &[CameraState::Connected])?;
        let remote = capture_and_fetch(&self.inner.command, &self.inner.retrieval)
            .await
            .map_err(|e| self.inner.fault_on_connection(e))?;
        Ok(remote.map(|remote| {
            let frame = Arc::new(FrameImage {
                sequence: 0,
                name: remote.name,
                bytes: remote.bytes,
                captured_at: chrono::Utc::now(),
            });
            self.inner.latest.store(Some(Arc::clone(&frame)));
            frame
        }))
    }

    // ── Internals ────────────────────────────────────────────────────

    fn require(&self, operation: &'static str, allowed: &[CameraState]) -> Result<(), CoreError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(CoreError::InvalidState { operation, state })
        }
    }

    /// Send and turn `Error` / `Timeout` replies into errors.
    async fn send_checked(&self, request: &CommandRequest) -> Result<CommandResponse, CoreError> {
        let response = self
            .inner
            .command
            .send(request)
            .await
            .map_err(|e| self.inner.channel_failed(e))?;
        check_response(&request.verb, response, self.inner.config.timeout)
    }

    async fn teardown(&self, lifecycle: &mut Lifecycle) {
        if let Some(handle) = lifecycle.stream.take() {
            handle.stop().await;
        }
        if let Some((cancel, task)) = lifecycle.keep_alive.take() {
            cancel.cancel();
            let _ = task.await;
        }
        self.inner.command.close().await;
        self.inner.retrieval.close().await;
    }

    fn spawn_keep_alive(&self) -> Option<(CancellationToken, JoinHandle<()>)> {
        let interval = self.inner.config.keep_alive_interval;
        if interval.is_zero() {
            return None;
        }
        let cancel = self.inner.cancel.child_token();
        let task = tokio::spawn(keep_alive(
            Arc::clone(&self.inner.retrieval),
            self.inner.state.subscribe(),
            interval,
            cancel.clone(),
        ));
        Some((cancel, task))
    }
}

const ONLINE: &[CameraState] = &[CameraState::Connected, CameraState::Streaming];

impl ControllerInner {
    /// Publish `next` and notify observers if it differs from the current
    /// state.
    fn set_state(&self, next: CameraState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            debug!(state = %next, "camera state changed");
            self.observers.state_changed(next);
        }
    }

    /// Move to `next` only from one of `from`. Returns whether it moved.
    fn transition(&self, from: &[CameraState], next: CameraState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if from.contains(state) && *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(state = %next, "camera state changed");
            self.observers.state_changed(next);
        }
        changed
    }

    fn channel_failed(&self, error: skycam_api::Error) -> CoreError {
        self.fault_on_connection(error.into())
    }

    /// A connection error on a synchronous call means the channel already
    /// spent its reconnect: fault while `Connected`. While streaming the
    /// loop's recovery policy owns the decision.
    fn fault_on_connection(&self, error: CoreError) -> CoreError {
        if error.is_connection()
            && self.transition(&[CameraState::Connected], CameraState::Faulted)
        {
            warn!(error = %error, "camera faulted");
        }
        error
    }
}

fn check_response(
    verb: &str,
    response: CommandResponse,
    timeout: Duration,
) -> Result<CommandResponse, CoreError> {
    match response.status {
        ResponseStatus::Ok => Ok(response),
        ResponseStatus::Error => Err(CoreError::Command {
            verb: verb.to_owned(),
            message: response.payload,
        }),
        ResponseStatus::Timeout => Err(CoreError::timeout(timeout)),
    }
}

/// The confirmed value is the reply payload when it is numeric.
fn confirmed(response: &CommandResponse, requested: f64) -> f64 {
    response
        .payload
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(requested)
}

async fn capture_and_fetch(
    command: &CommandChannel,
    retrieval: &RetrievalChannel,
) -> Result<Option<RemoteFrame>, CoreError> {
    let request = CommandRequest::capture();
    let response = command.send(&request).await?;
    check_response(&request.verb, response, command.settings().timeout)?;
    Ok(retrieval.fetch_latest().await?)
}

// ── Streaming source ─────────────────────────────────────────────────

struct ChannelSource {
    command: Arc<CommandChannel>,
    retrieval: Arc<RetrievalChannel>,
    policy: ReconnectPolicy,
    controller: Weak<ControllerInner>,
    run: u64,
}

impl FrameSource for ChannelSource {
    async fn capture_and_fetch(&self) -> Result<Option<RemoteFrame>, CoreError> {
        capture_and_fetch(&self.command, &self.retrieval).await
    }

    async fn recover(&self, cancel: &CancellationToken) -> bool {
        for attempt in 1..=self.policy.max_attempts {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(self.policy.backoff) => {}
            }
            info!(attempt, max = self.policy.max_attempts, "reconnecting to camera");
            let reconnected = tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                result = async {
                    self.command.connect().await?;
                    self.retrieval.reconnect().await?;
                    Ok::<(), skycam_api::Error>(())
                } => result,
            };
            match reconnected {
                Ok(()) => {
                    info!(attempt, "camera reconnected");
                    return true;
                }
                Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            }
        }
        false
    }

    fn finished(&self, exit: LoopExit) {
        let Some(inner) = self.controller.upgrade() else {
            return;
        };
        let next = match exit {
            LoopExit::Stopped => return,
            LoopExit::StopTimeReached => CameraState::Connected,
            LoopExit::Faulted => CameraState::Faulted,
        };
        if inner.transition(&[CameraState::Streaming], next) {
            info!(?exit, state = %next, "streaming ended by itself");
        }

        // Reap the finished handle once the lifecycle lock is free.
        let run = self.run;
        let controller = Weak::clone(&self.controller);
        tokio::spawn(async move {
            let Some(inner) = controller.upgrade() else {
                return;
            };
            let handle = {
                let mut lifecycle = inner.lifecycle.lock().await;
                if lifecycle.run == run {
                    lifecycle.stream.take()
                } else {
                    None
                }
            };
            if let Some(handle) = handle {
                handle.stop().await;
            }
        });
    }
}

// ── Keep-alive ───────────────────────────────────────────────────────

async fn keep_alive(
    retrieval: Arc<RetrievalChannel>,
    state: watch::Receiver<CameraState>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        if !state.borrow().is_online() {
            continue;
        }
        match retrieval.try_ping().await {
            Ok(true) => trace!("ftp keep-alive"),
            Ok(false) => trace!("ftp busy, keep-alive skipped"),
            Err(e) => warn!(error = %e, "ftp keep-alive failed"),
        }
    }
}
