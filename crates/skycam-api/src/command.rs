// Telnet command channel
//
// One persistent TCP session to the camera's command port. Requests are
// serialized by a FIFO mutex around the session so exactly one command is
// on the wire at a time. The session is marked stale before each exchange
// and cleared once a reply has been fully read; a stale session (timeout,
// cancelled future) is re-established before the next request so a late
// reply can never be handed to a different caller.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::protocol::{CommandRequest, CommandResponse, Dialect};
use crate::transport::LineStream;

const LOGIN_SUCCESS: &str = "User Logged In";
const IN_SIGHT_BANNER: &str = "In-Sight";
const IDENTIFY_ATTEMPTS: usize = 2;

/// Connection parameters for the command channel.
#[derive(Debug, Clone)]
pub struct CommandSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Bounds the connect+login handshake and every reply read.
    pub timeout: Duration,
    pub dialect: Dialect,
}

impl CommandSettings {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// What the camera told us about itself while logging in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CameraInfo {
    /// Welcome text preceding the `User:` prompt.
    pub banner: String,
    /// Serial number from the identify exchange (In-Sight dialect only).
    pub serial_number: Option<String>,
}

struct Session {
    stream: LineStream,
    info: CameraInfo,
    /// Set while an exchange is in flight. Still set afterwards means the
    /// reply stream is out of step with our requests.
    stale: bool,
}

/// Line-oriented request/response channel over Telnet.
pub struct CommandChannel {
    settings: CommandSettings,
    session: Mutex<Option<Session>>,
}

impl CommandChannel {
    pub fn new(settings: CommandSettings) -> Self {
        Self {
            settings,
            session: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &CommandSettings {
        &self.settings
    }

    /// Connect and log in, replacing any existing session.
    pub async fn connect(&self) -> Result<CameraInfo, Error> {
        let mut guard = self.session.lock().await;
        if let Some(mut old) = guard.take() {
            old.stream.shutdown().await;
        }
        let session = open_session(&self.settings).await?;
        let info = session.info.clone();
        *guard = Some(session);
        Ok(info)
    }

    /// Whether a session is currently held.
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Identity captured during the most recent login.
    pub async fn info(&self) -> Option<CameraInfo> {
        self.session.lock().await.as_ref().map(|s| s.info.clone())
    }

    /// Send one request and read its reply.
    ///
    /// A read timeout yields a [`ResponseStatus::Timeout`] response rather
    /// than an error. Transport failures trigger one transparent reconnect
    /// and resend; a second failure is returned as [`Error::Connect`].
    ///
    /// [`ResponseStatus::Timeout`]: crate::protocol::ResponseStatus::Timeout
    pub async fn send(&self, request: &CommandRequest) -> Result<CommandResponse, Error> {
        let dialect = self.settings.dialect;
        let line = dialect.encode(request)?;

        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Err(Error::NotConnected);
        };

        if session.stale {
            debug!("command session out of step, re-establishing");
            self.reopen(session).await?;
        }

        match exchange(session, dialect, &line, self.settings.timeout).await {
            Err(e) if e.is_connection() => {
                warn!(error = %e, command = %line, "command channel failed, reconnecting once");
                self.reopen(session).await?;
                exchange(session, dialect, &line, self.settings.timeout)
                    .await
                    .map_err(|e| {
                        if e.is_connection() {
                            Error::Connect {
                                addr: self.settings.addr(),
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

    /// Close the session. Idempotent.
    pub async fn close(&self) {
        if let Some(mut session) = self.session.lock().await.take() {
            session.stream.shutdown().await;
            debug!(addr = %self.settings.addr(), "command channel closed");
        }
    }

    async fn reopen(&self, session: &mut Session) -> Result<(), Error> {
        session.stream.shutdown().await;
        *session = open_session(&self.settings).await?;
        Ok(())
    }
}

/// Write `line` and read the full reply. `Ok` with a timeout response when
/// the reply does not arrive in time; the session then stays stale.
async fn exchange(
    session: &mut Session,
    dialect: Dialect,
    line: &str,
    timeout: Duration,
) -> Result<CommandResponse, Error> {
    session.stale = true;
    session.stream.discard_buffered();
    debug!(command = %line, "sending command");
    session.stream.write_line(line, dialect.terminator()).await?;

    let stream = &mut session.stream;
    let read = async {
        let status = stream.read_line().await?;
        let mut data = Vec::new();
        if dialect.is_success_status(&status) {
            for _ in 0..dialect.data_lines(line) {
                data.push(stream.read_line().await?);
            }
        }
        Ok::<_, Error>((status, data))
    };

    match tokio::time::timeout(timeout, read).await {
        Ok(Ok((status, data))) => {
            // Reply fully consumed: the stream is in step again even if
            // the reply itself turns out to be malformed.
            session.stale = false;
            let response = dialect.decode(&status, &data)?;
            debug!(command = %line, status = ?response.status, payload = %response.payload, "reply");
            Ok(response)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(command = %line, timeout_ms = timeout.as_millis(), "command reply timed out");
            Ok(CommandResponse::timeout())
        }
    }
}

async fn open_session(settings: &CommandSettings) -> Result<Session, Error> {
    let addr = settings.addr();
    let mut stream = LineStream::connect(&settings.host, settings.port, settings.timeout).await?;

    let banner = match tokio::time::timeout(settings.timeout, login(&mut stream, settings)).await {
        Ok(Ok(banner)) => banner,
        Ok(Err(e @ (Error::Authentication { .. } | Error::Connect { .. }))) => return Err(e),
        Ok(Err(e)) => {
            return Err(Error::Connect {
                addr,
                reason: format!("login failed: {e}"),
            });
        }
        Err(_) => {
            return Err(Error::Connect {
                addr,
                reason: format!("login timed out after {} ms", settings.timeout.as_millis()),
            });
        }
    };

    let mut session = Session {
        stream,
        info: CameraInfo {
            banner,
            serial_number: None,
        },
        stale: false,
    };

    if settings.dialect == Dialect::InSight {
        session.info.serial_number = identify(&mut session, settings.timeout).await;
    }

    info!(
        addr = %addr,
        serial = session.info.serial_number.as_deref().unwrap_or("-"),
        "command channel logged in"
    );
    Ok(session)
}

/// Banner, `User:` and `Password:` prompts, then the logged-in confirmation.
async fn login(stream: &mut LineStream, settings: &CommandSettings) -> Result<String, Error> {
    let preamble = stream.read_until(b"User:").await?;
    let banner = preamble
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("User:"))
        .unwrap_or_default()
        .to_owned();

    if settings.dialect == Dialect::InSight && !banner.contains(IN_SIGHT_BANNER) {
        return Err(Error::Connect {
            addr: settings.addr(),
            reason: format!("unexpected welcome banner {banner:?}"),
        });
    }

    stream.write_line(&settings.username, "\r\n").await?;
    stream.read_until(b"Password:").await?;
    stream
        .write_line(settings.password.expose_secret(), "\r\n")
        .await?;

    let mut reply = stream.read_line().await?;
    // Some firmware echoes an empty line after the password.
    if reply.trim().is_empty() {
        reply = stream.read_line().await?;
    }
    if !reply.contains(LOGIN_SUCCESS) {
        return Err(Error::Authentication {
            message: if reply.trim().is_empty() {
                "login rejected".to_owned()
            } else {
                reply.trim().to_owned()
            },
        });
    }
    Ok(banner)
}

/// `GI` exchange; the serial number is informational so failures only warn.
async fn identify(session: &mut Session, timeout: Duration) -> Option<String> {
    let line = "GI";
    for attempt in 1..=IDENTIFY_ATTEMPTS {
        match exchange(session, Dialect::InSight, line, timeout).await {
            Ok(response) if response.is_ok() => {
                let serial = response.payload.lines().find_map(|l| {
                    l.split_once("Serial Number:")
                        .map(|(_, serial)| serial.trim().to_owned())
                });
                if serial.is_some() {
                    return serial;
                }
                warn!(attempt, payload = %response.payload, "identify reply carried no serial number");
            }
            Ok(response) => {
                warn!(attempt, status = ?response.status, "identify rejected");
            }
            Err(e) => {
                warn!(attempt, error = %e, "identify failed");
                if e.is_connection() {
                    break;
                }
            }
        }
    }
    None
}
