//! Capture and streaming handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use skycam_core::{CameraObserver, CameraState, CoreError, FrameImage, StreamStats};

use crate::cli::{CaptureArgs, StreamArgs};
use crate::error::CliError;
use crate::output;

use super::Ctx;

#[derive(Serialize)]
struct FrameView<'a> {
    sequence: u64,
    name: &'a str,
    bytes: usize,
    captured_at: DateTime<Utc>,
    path: Option<String>,
}

impl<'a> FrameView<'a> {
    fn new(frame: &'a FrameImage, path: Option<&Path>) -> Self {
        Self {
            sequence: frame.sequence,
            name: &frame.name,
            bytes: frame.len(),
            captured_at: frame.captured_at,
            path: path.map(|p| p.display().to_string()),
        }
    }

    fn text(&self) -> String {
        let target = self.path.as_deref().unwrap_or("-");
        format!(
            "#{:<6} {:<24} {:>9} bytes  {}",
            self.sequence, self.name, self.bytes, target
        )
    }
}

/// Last path component of a remote name.
fn base_name(remote: &str) -> &str {
    remote.rsplit('/').next().unwrap_or(remote)
}

// ── capture ──────────────────────────────────────────────────────────

pub async fn capture(ctx: &Ctx<'_>, args: &CaptureArgs) -> Result<(), CliError> {
    let frame = ctx
        .controller
        .capture_once()
        .await
        .map_err(|e| ctx.core(e))?
        .ok_or(CliError::NoFrame)?;

    let path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(base_name(&frame.name)));
    tokio::fs::write(&path, &frame.bytes).await?;

    let view = FrameView::new(&frame, Some(&path));
    let out = output::render(ctx.global, &view, FrameView::text)?;
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}

// ── stream ───────────────────────────────────────────────────────────

enum Event {
    Frame(Arc<FrameImage>),
    Error(CoreError),
}

/// Hands callbacks off to the command's task; never blocks the worker.
struct Forwarder(mpsc::UnboundedSender<Event>);

impl CameraObserver for Forwarder {
    fn on_frame(&self, frame: Arc<FrameImage>) {
        let _ = self.0.send(Event::Frame(frame));
    }

    fn on_error(&self, error: &CoreError) {
        let _ = self.0.send(Event::Error(error.clone()));
    }
}

pub async fn stream(ctx: &Ctx<'_>, args: &StreamArgs) -> Result<(), CliError> {
    let mut options = ctx.resolved.stream;
    if let Some(ms) = args.interval_ms {
        if ms == 0 {
            return Err(CliError::Validation {
                field: "interval-ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        options.interval = Duration::from_millis(ms);
    }
    if let Some(ref stop_time) = args.stop_time {
        options.stop_at = Some(skycam_config::parse_time_of_day(stop_time)?);
    }
    if let Some(ref dir) = args.output_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = ctx.controller.subscribe(Arc::new(Forwarder(tx)));
    let mut state = ctx.controller.watch_state();
    ctx.controller
        .start_streaming(options)
        .await
        .map_err(|e| ctx.core(e))?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut received: u64 = 0;

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            event = rx.recv() => match event {
                Some(Event::Frame(frame)) => {
                    if let Err(e) = write_frame(ctx, &frame, args.output_dir.as_deref()).await {
                        break Err(e);
                    }
                    received += 1;
                    if args.count.is_some_and(|count| received >= count) {
                        break Ok(());
                    }
                }
                Some(Event::Error(err)) => warn!(error = %err, "capture cycle failed"),
                None => break Ok(()),
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = *state.borrow_and_update();
                match current {
                    CameraState::Faulted => break Err(CliError::Faulted),
                    // Stop time reached
                    CameraState::Connected => break Ok(()),
                    _ => {}
                }
            }
        }
    };

    ctx.controller.unsubscribe(subscription);
    let stats = if ctx.controller.state() == CameraState::Streaming {
        ctx.controller
            .stop_streaming()
            .await
            .map_err(|e| ctx.core(e))?
    } else {
        ctx.controller.stream_stats()
    };
    print_summary(ctx, &stats)?;
    outcome
}

async fn write_frame(
    ctx: &Ctx<'_>,
    frame: &FrameImage,
    dir: Option<&Path>,
) -> Result<(), CliError> {
    let path = match dir {
        Some(dir) => {
            let path = dir.join(format!("{:06}_{}", frame.sequence, base_name(&frame.name)));
            tokio::fs::write(&path, &frame.bytes).await?;
            Some(path)
        }
        None => None,
    };
    let view = FrameView::new(frame, path.as_deref());
    let out = output::render_line(ctx.global, &view, FrameView::text)?;
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}

fn print_summary(ctx: &Ctx<'_>, stats: &StreamStats) -> Result<(), CliError> {
    let out = output::render_line(ctx.global, stats, |s| {
        format!(
            "delivered {}  dropped {}  errors {}  empty {}",
            s.delivered, s.dropped, s.errors, s.empty_cycles
        )
    })?;
    // Summary goes to stderr in text mode so piped frame lists stay clean
    if ctx.global.json {
        output::print_output(&out, ctx.global.quiet);
    } else if !ctx.global.quiet {
        eprintln!("{out}");
    }
    Ok(())
}
