// ── Streaming loop ──
//
// Fixed-interval capture/fetch cycle running on two tokio tasks: the
// polling task talks to the camera and reports errors, the delivery task
// hands frames to the consumer from a latest-wins slot. Cancellation is
// checked before every callback so nothing is delivered once `stop`
// has returned.

mod slot;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use skycam_api::RemoteFrame;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamOptions;
use crate::error::CoreError;
use crate::model::{FrameImage, StreamStats};

use self::slot::LatestSlot;

const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a streaming run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// `stop()` was requested.
    Stopped,
    /// The configured stop time of day was reached.
    StopTimeReached,
    /// A connection error could not be recovered.
    Faulted,
}

/// What the loop drives each cycle.
pub trait FrameSource: Send + Sync + 'static {
    /// Trigger a capture and fetch the resulting frame, if any.
    fn capture_and_fetch(
        &self,
    ) -> impl Future<Output = Result<Option<RemoteFrame>, CoreError>> + Send;

    /// Re-establish connectivity after a connection-class failure. Returns
    /// `false` when the loop should end as faulted.
    fn recover(&self, cancel: &CancellationToken) -> impl Future<Output = bool> + Send;

    /// Called once from the polling task when the run ends.
    fn finished(&self, exit: LoopExit) {
        let _ = exit;
    }
}

// ── Counters ─────────────────────────────────────────────────────────

/// Lock-free run counters shared between the tasks and readers.
#[derive(Debug, Default)]
pub struct StreamCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    empty_cycles: AtomicU64,
}

impl StreamCounters {
    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            empty_cycles: self.empty_cycles.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ── StreamHandle ─────────────────────────────────────────────────────

/// Owner of a running loop. Dropping it cancels the loop without joining.
pub struct StreamHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    paused: Arc<AtomicBool>,
    counters: Arc<StreamCounters>,
    stop_timeout: Duration,
}

impl StreamHandle {
    /// Skip cycles until resumed. The run (and its sequence) continues.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }

    pub fn counters(&self) -> Arc<StreamCounters> {
        Arc::clone(&self.counters)
    }

    /// Whether both tasks have ended.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }

    /// Cancel and join. Tasks still running after the stop timeout are
    /// aborted. No callback starts after this returns.
    pub async fn stop(mut self) -> StreamStats {
        self.cancel.cancel();
        let deadline = Instant::now() + self.stop_timeout;
        for mut task in std::mem::take(&mut self.tasks) {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!("streaming task did not stop in time, aborting");
                task.abort();
            }
        }
        self.counters.snapshot()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── StreamingLoop ────────────────────────────────────────────────────

/// Entry point for starting a streaming run.
pub struct StreamingLoop;

impl StreamingLoop {
    /// Spawn the polling and delivery tasks. Sequence numbers start at 0.
    ///
    /// Fails with [`CoreError::Config`] when `options.interval` is zero.
    pub fn start<S, F, E>(
        source: Arc<S>,
        options: StreamOptions,
        cancel: CancellationToken,
        on_frame: F,
        on_error: E,
    ) -> Result<StreamHandle, CoreError>
    where
        S: FrameSource,
        F: Fn(Arc<FrameImage>) + Send + Sync + 'static,
        E: Fn(CoreError) + Send + Sync + 'static,
    {
        if options.interval.is_zero() {
            return Err(CoreError::Config {
                message: "stream interval must be greater than zero".into(),
            });
        }

        let slot = Arc::new(LatestSlot::new());
        let paused = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(StreamCounters::default());

        let poller = Poller {
            source,
            options,
            cancel: cancel.clone(),
            slot: Arc::clone(&slot),
            paused: Arc::clone(&paused),
            counters: Arc::clone(&counters),
            on_error,
        };
        let polling = tokio::spawn(poller.run());
        let delivery = tokio::spawn(deliver(
            slot,
            cancel.clone(),
            Arc::clone(&counters),
            on_frame,
        ));

        info!(interval_ms = options.interval.as_millis(), "streaming started");
        Ok(StreamHandle {
            cancel,
            tasks: vec![polling, delivery],
            paused,
            counters,
            stop_timeout: options.stop_timeout,
        })
    }
}

struct Poller<S, E> {
    source: Arc<S>,
    options: StreamOptions,
    cancel: CancellationToken,
    slot: Arc<LatestSlot<Arc<FrameImage>>>,
    paused: Arc<AtomicBool>,
    counters: Arc<StreamCounters>,
    on_error: E,
}

impl<S, E> Poller<S, E>
where
    S: FrameSource,
    E: Fn(CoreError) + Send + Sync + 'static,
{
    async fn run(self) {
        let exit = self.cycles().await;
        // The delivery task ends with the run.
        self.cancel.cancel();
        let stats = self.counters.snapshot();
        info!(?exit, delivered = stats.delivered, dropped = stats.dropped, errors = stats.errors, "streaming ended");
        self.source.finished(exit);
    }

    async fn cycles(&self) -> LoopExit {
        let cycle_timeout = self.options.cycle_timeout.unwrap_or(DEFAULT_CYCLE_TIMEOUT);
        let stop_deadline = self.options.stop_at.map(|at| {
            let wait = until_next(at, Local::now().naive_local());
            debug!(stop_at = %at, wait_secs = wait.as_secs(), "stop time scheduled");
            Instant::now() + wait
        });
        let stop_reached = async move {
            match stop_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(stop_reached);

        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence: u64 = 0;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return LoopExit::Stopped,
                () = &mut stop_reached => return LoopExit::StopTimeReached,
                _ = ticker.tick() => {}
            }
            if self.paused.load(Ordering::SeqCst) {
                continue;
            }

            let cycle = tokio::time::timeout(cycle_timeout, self.source.capture_and_fetch());
            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return LoopExit::Stopped,
                outcome = cycle => outcome,
            };

            match outcome {
                Ok(Ok(Some(remote))) => {
                    let frame = Arc::new(FrameImage {
                        sequence,
                        name: remote.name,
                        bytes: remote.bytes,
                        captured_at: Utc::now(),
                    });
                    sequence += 1;
                    if self.slot.put(frame) {
                        StreamCounters::bump(&self.counters.dropped);
                        debug!("undelivered frame replaced by newer one");
                    }
                }
                Ok(Ok(None)) => StreamCounters::bump(&self.counters.empty_cycles),
                Ok(Err(error)) => {
                    let connection = error.is_connection();
                    if !self.report(error) {
                        return LoopExit::Stopped;
                    }
                    if connection && !self.source.recover(&self.cancel).await {
                        if self.cancel.is_cancelled() {
                            return LoopExit::Stopped;
                        }
                        return LoopExit::Faulted;
                    }
                }
                Err(_) => {
                    warn!(timeout_ms = cycle_timeout.as_millis(), "capture cycle stalled, abandoned");
                    if !self.report(CoreError::timeout(cycle_timeout)) {
                        return LoopExit::Stopped;
                    }
                }
            }
        }
    }

    /// Invoke `on_error` unless cancelled. Returns `false` when cancelled.
    fn report(&self, error: CoreError) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        StreamCounters::bump(&self.counters.errors);
        debug!(error = %error, "streaming cycle failed");
        (self.on_error)(error);
        true
    }
}

async fn deliver<F>(
    slot: Arc<LatestSlot<Arc<FrameImage>>>,
    cancel: CancellationToken,
    counters: Arc<StreamCounters>,
    on_frame: F,
) where
    F: Fn(Arc<FrameImage>) + Send + Sync + 'static,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            frame = slot.take() => frame,
        };
        if cancel.is_cancelled() {
            return;
        }
        StreamCounters::bump(&counters.delivered);
        on_frame(frame);
        // Let the polling task run between deliveries on a current-thread
        // runtime.
        tokio::task::yield_now().await;
    }
}

/// Time until the next occurrence of `at` after `now` (tomorrow when `at`
/// has already passed today).
pub(crate) fn until_next(at: NaiveTime, now: NaiveDateTime) -> Duration {
    let today = now.date().and_time(at);
    let next = if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    };
    (next - now).to_std().unwrap_or_default()
}
