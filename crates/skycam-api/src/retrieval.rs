// FTP retrieval channel
//
// Pulls the newest captured image from the camera's file store. A frame is
// "new" when its (name, size, mtime) fingerprint differs from the last one
// handed out; servers that cannot report mtime fall back to comparing the
// downloaded bytes. The session is marked dirty for the duration of every
// operation so an interrupted fetch forces a reconnect before the next one.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::ftp::FtpSession;

/// Where the camera writes captured images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameLocator {
    /// A single file the camera overwrites on every capture.
    File(String),
    /// A directory; the lexicographically greatest name with `extension`
    /// is the newest frame.
    Directory { path: String, extension: String },
}

impl Default for FrameLocator {
    fn default() -> Self {
        Self::File("image.bmp".into())
    }
}

impl fmt::Display for FrameLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(name) => f.write_str(name),
            Self::Directory { path, extension } => {
                write!(f, "{}/*.{extension}", path.trim_end_matches('/'))
            }
        }
    }
}

/// Connection parameters for the retrieval channel.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub timeout: Duration,
    pub locator: FrameLocator,
    /// Remove each file after it has been downloaded.
    pub delete_after_fetch: bool,
    /// Re-establish the FTP session once it is older than this.
    pub session_max_age: Option<Duration>,
}

/// A downloaded image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFrame {
    pub name: String,
    pub bytes: Bytes,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    name: String,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    /// `connect` was called and `close` was not.
    open: bool,
    session: Option<FtpSession>,
    connected_at: Option<Instant>,
    dirty: bool,
    last: Option<Fingerprint>,
    /// Only kept when the server reports no mtime.
    last_bytes: Option<Bytes>,
}

enum Fetched {
    Missing,
    Stale,
    Frame(RemoteFrame, Fingerprint),
}

/// Serialized access to the camera's FTP file store.
pub struct RetrievalChannel {
    settings: RetrievalSettings,
    state: Mutex<State>,
}

impl RetrievalChannel {
    pub fn new(settings: RetrievalSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(State::default()),
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Log in and switch to binary mode. Forgets the last fingerprint.
    pub async fn connect(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if let Some(old) = state.session.take() {
            old.quit().await;
        }
        let session = open_session(&self.settings).await?;
        *state = State {
            open: true,
            session: Some(session),
            connected_at: Some(Instant::now()),
            ..State::default()
        };
        info!(host = %self.settings.host, port = self.settings.port, "retrieval channel logged in");
        Ok(())
    }

    /// Replace the session but keep the last fingerprint, so a frame that
    /// was already returned is not returned again after recovery.
    pub async fn reconnect(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        self.reopen(&mut state).await?;
        state.open = true;
        info!(host = %self.settings.host, "retrieval channel reconnected");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.open
    }

    /// Download the newest frame if it differs from the last one returned.
    ///
    /// `Ok(None)` when nothing new is available.
    pub async fn fetch_latest(&self) -> Result<Option<RemoteFrame>, Error> {
        let mut state = self.state.lock().await;
        self.ensure_session(&mut state).await?;

        match self.fetch_once(&mut state).await {
            Err(e) if e.is_connection() => {
                warn!(error = %e, "retrieval channel failed, reconnecting once");
                self.reopen(&mut state).await?;
                self.fetch_once(&mut state).await.map_err(|e| {
                    if e.is_connection() {
                        Error::Connect {
                            addr: format!("{}:{}", self.settings.host, self.settings.port),
                            reason: e.to_string(),
                        }
                    } else {
                        e
                    }
                })
            }
            other => other,
        }
    }

    /// `NOOP` health check.
    pub async fn ping(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        self.ping_locked(&mut state).await
    }

    /// `NOOP` unless another operation holds the channel. Returns whether a
    /// ping was sent.
    pub async fn try_ping(&self) -> Result<bool, Error> {
        let Ok(mut state) = self.state.try_lock() else {
            return Ok(false);
        };
        self.ping_locked(&mut state).await.map(|()| true)
    }

    /// `QUIT` and drop the session. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.open = false;
        state.last = None;
        state.last_bytes = None;
        state.connected_at = None;
        if let Some(session) = state.session.take() {
            session.quit().await;
            debug!("retrieval channel closed");
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn ping_locked(&self, state: &mut State) -> Result<(), Error> {
        self.ensure_session(state).await?;
        state.dirty = true;
        let session = state.session.as_mut().ok_or(Error::NotConnected)?;
        let result = session.noop().await;
        state.dirty = matches!(&result, Err(e) if e.poisons_session());
        result
    }

    /// Reconnect when the session is missing, dirty or past its max age.
    async fn ensure_session(&self, state: &mut State) -> Result<(), Error> {
        if !state.open {
            return Err(Error::NotConnected);
        }
        let expired = match (self.settings.session_max_age, state.connected_at) {
            (Some(max_age), Some(at)) => at.elapsed() >= max_age,
            _ => false,
        };
        if state.session.is_none() || state.dirty {
            debug!("retrieval session unusable, reconnecting");
            self.reopen(state).await
        } else if expired {
            info!("rotating FTP session");
            if let Some(old) = state.session.take() {
                old.quit().await;
            }
            self.reopen(state).await
        } else {
            Ok(())
        }
    }

    /// Replace the session. The old one is dropped without `QUIT`: it is
    /// either gone already or out of step.
    async fn reopen(&self, state: &mut State) -> Result<(), Error> {
        state.session = None;
        let session = open_session(&self.settings).await?;
        state.session = Some(session);
        state.connected_at = Some(Instant::now());
        state.dirty = false;
        Ok(())
    }

    async fn fetch_once(&self, state: &mut State) -> Result<Option<RemoteFrame>, Error> {
        state.dirty = true;
        let session = state.session.as_mut().ok_or(Error::NotConnected)?;
        let result = fetch(
            session,
            &self.settings,
            state.last.as_ref(),
            state.last_bytes.as_ref(),
        )
        .await;
        state.dirty = matches!(&result, Err(e) if e.poisons_session());

        match result? {
            Fetched::Missing => Ok(None),
            Fetched::Stale => {
                debug!("no new frame");
                Ok(None)
            }
            Fetched::Frame(frame, fingerprint) => {
                state.last_bytes = fingerprint.modified.is_none().then(|| frame.bytes.clone());
                state.last = Some(fingerprint);
                if self.settings.delete_after_fetch {
                    if let Some(session) = state.session.as_mut() {
                        match session.dele(&remote_path(&self.settings.locator, &frame.name)).await {
                            // Whatever appears next is new, even with an identical fingerprint
                            Ok(()) => {
                                state.last = None;
                                state.last_bytes = None;
                            }
                            Err(e) => {
                                warn!(name = %frame.name, error = %e, "failed to delete fetched frame");
                                state.dirty = e.poisons_session();
                            }
                        }
                    }
                }
                Ok(Some(frame))
            }
        }
    }
}

async fn open_session(settings: &RetrievalSettings) -> Result<FtpSession, Error> {
    let mut session = FtpSession::connect(&settings.host, settings.port, settings.timeout).await?;
    match session
        .login(&settings.username, settings.password.expose_secret())
        .await
    {
        Ok(()) => Ok(session),
        Err(e @ Error::Authentication { .. }) => Err(e),
        Err(e) => Err(Error::Connect {
            addr: format!("{}:{}", settings.host, settings.port),
            reason: format!("FTP login failed: {e}"),
        }),
    }
}

async fn fetch(
    session: &mut FtpSession,
    settings: &RetrievalSettings,
    last: Option<&Fingerprint>,
    last_bytes: Option<&Bytes>,
) -> Result<Fetched, Error> {
    let name = match &settings.locator {
        FrameLocator::File(path) => path.rsplit('/').next().unwrap_or(path).to_owned(),
        FrameLocator::Directory { path, extension } => {
            let suffix = format!(".{}", extension.trim_start_matches('.').to_ascii_lowercase());
            let newest = session
                .nlst(path)
                .await?
                .into_iter()
                .filter(|n| n.to_ascii_lowercase().ends_with(&suffix))
                .max();
            match newest {
                Some(name) => name,
                None => return Ok(Fetched::Missing),
            }
        }
    };
    let path = remote_path(&settings.locator, &name);

    let Some(size) = session.size(&path).await? else {
        debug!(path = %path, "no frame on camera yet");
        return Ok(Fetched::Missing);
    };
    let modified = session.mdtm(&path).await?;
    let fingerprint = Fingerprint {
        name,
        size,
        modified,
    };
    if modified.is_some() && last == Some(&fingerprint) {
        return Ok(Fetched::Stale);
    }

    let bytes = session.retr(&path).await?;
    let received = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    if received != size {
        return Err(Error::IncompleteTransfer {
            name: fingerprint.name,
            expected: size,
            received,
        });
    }
    if modified.is_none()
        && last.is_some_and(|l| l.name == fingerprint.name)
        && last_bytes == Some(&bytes)
    {
        return Ok(Fetched::Stale);
    }

    debug!(name = %fingerprint.name, bytes = size, "fetched frame");
    Ok(Fetched::Frame(
        RemoteFrame {
            name: fingerprint.name.clone(),
            bytes,
            modified,
        },
        fingerprint,
    ))
}

fn remote_path(locator: &FrameLocator, name: &str) -> String {
    match locator {
        FrameLocator::File(path) => path.clone(),
        FrameLocator::Directory { path, .. } => {
            let dir = path.trim_end_matches('/');
            if dir.is_empty() {
                name.to_owned()
            } else {
                format!("{dir}/{name}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_paths() {
        assert_eq!(remote_path(&FrameLocator::default(), "image.bmp"), "image.bmp");
        let dir = FrameLocator::Directory {
            path: "/images/".into(),
            extension: "bmp".into(),
        };
        assert_eq!(remote_path(&dir, "img_0001.bmp"), "/images/img_0001.bmp");
        let root = FrameLocator::Directory {
            path: String::new(),
            extension: "bmp".into(),
        };
        assert_eq!(remote_path(&root, "a.bmp"), "a.bmp");
        assert_eq!(dir.to_string(), "/images/*.bmp");
    }
}
