// Stub Telnet command server
//
// Emulates the camera's login prompts and answers commands from a small
// in-memory parameter table. Tests override replies per command prefix to
// inject rejections, silence, delays or hangups.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::lock;

pub const DEFAULT_BANNER: &str = "Welcome to In-Sight(tm) 8502C Session 0";
pub const DEFAULT_SERIAL: &str = "1A2B3C4D5E";

/// Reply framing the stub speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StubDialect {
    /// `OK payload` / `ERR payload`.
    #[default]
    Line,
    /// Numeric status line plus data lines.
    InSight,
}

/// What the stub does in response to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubReply {
    /// Send these lines, CR/LF terminated.
    Lines(Vec<String>),
    /// Wait, then send these lines.
    Delayed(Duration, Vec<String>),
    /// Send nothing.
    Silent,
    /// Close the connection without replying.
    Hangup,
}

impl StubReply {
    pub fn line(line: impl Into<String>) -> Self {
        Self::Lines(vec![line.into()])
    }

    pub fn delayed(delay: Duration, line: impl Into<String>) -> Self {
        Self::Delayed(delay, vec![line.into()])
    }
}

struct Override {
    prefix: String,
    reply: StubReply,
    remaining: Option<usize>,
}

type CaptureHook = Arc<dyn Fn() + Send + Sync>;

struct Shared {
    dialect: StubDialect,
    banner: Mutex<String>,
    username: String,
    password: String,
    reject_logins: AtomicBool,
    exposure: Mutex<String>,
    gain: Mutex<String>,
    overrides: Mutex<VecDeque<Override>>,
    received: Mutex<Vec<String>>,
    logins: AtomicUsize,
    on_capture: Mutex<Option<CaptureHook>>,
    kill: Mutex<CancellationToken>,
}

/// Stub camera command port.
pub struct TelnetStub {
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl TelnetStub {
    /// Bind an ephemeral port and start accepting. Credentials are
    /// `admin` with an empty password.
    pub async fn start(dialect: StubDialect) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            dialect,
            banner: Mutex::new(DEFAULT_BANNER.to_owned()),
            username: "admin".to_owned(),
            password: String::new(),
            reject_logins: AtomicBool::new(false),
            exposure: Mutex::new("10".to_owned()),
            gain: Mutex::new("0".to_owned()),
            overrides: Mutex::new(VecDeque::new()),
            received: Mutex::new(Vec::new()),
            logins: AtomicUsize::new(0),
            on_capture: Mutex::new(None),
            kill: Mutex::new(shutdown.child_token()),
        });

        let accept_shared = Arc::clone(&shared);
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    () = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                let Ok((socket, _)) = accepted else { continue };
                let shared = Arc::clone(&accept_shared);
                let kill = lock(&shared.kill).clone();
                tokio::spawn(async move {
                    tokio::select! {
                        () = kill.cancelled() => {}
                        () = serve(socket, shared) => {}
                    }
                });
            }
        });

        Ok(Self {
            addr,
            shared,
            shutdown,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Answer every command starting with `prefix` with `reply`.
    pub fn reply(&self, prefix: &str, reply: StubReply) {
        self.push_override(prefix, reply, None);
    }

    /// Answer the next `times` commands starting with `prefix` with `reply`.
    pub fn reply_times(&self, prefix: &str, reply: StubReply, times: usize) {
        self.push_override(prefix, reply, Some(times));
    }

    pub fn clear_replies(&self) {
        lock(&self.shared.overrides).clear();
    }

    pub fn set_banner(&self, banner: &str) {
        *lock(&self.shared.banner) = banner.to_owned();
    }

    pub fn reject_logins(&self, reject: bool) {
        self.shared.reject_logins.store(reject, Ordering::SeqCst);
    }

    /// Run `hook` whenever a capture command is accepted.
    pub fn on_capture(&self, hook: impl Fn() + Send + Sync + 'static) {
        *lock(&self.shared.on_capture) = Some(Arc::new(hook));
    }

    /// Commands received after login, in order, across all connections.
    pub fn received(&self) -> Vec<String> {
        lock(&self.shared.received).clone()
    }

    /// Number of successful logins.
    pub fn logins(&self) -> usize {
        self.shared.logins.load(Ordering::SeqCst)
    }

    pub fn exposure(&self) -> String {
        lock(&self.shared.exposure).clone()
    }

    pub fn gain(&self) -> String {
        lock(&self.shared.gain).clone()
    }

    /// Close every open connection. New connections are still accepted.
    pub fn drop_connections(&self) {
        let mut kill = lock(&self.shared.kill);
        kill.cancel();
        *kill = self.shutdown.child_token();
    }

    fn push_override(&self, prefix: &str, reply: StubReply, remaining: Option<usize>) {
        lock(&self.shared.overrides).push_back(Override {
            prefix: prefix.to_ascii_uppercase(),
            reply,
            remaining,
        });
    }
}

impl Drop for TelnetStub {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve(socket: TcpStream, shared: Arc<Shared>) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);

    let banner = lock(&shared.banner).clone();
    if write
        .write_all(format!("{banner}\r\nUser: ").as_bytes())
        .await
        .is_err()
    {
        return;
    }
    let Some(user) = next_line(&mut reader).await else { return };
    if write.write_all(b"Password: ").await.is_err() {
        return;
    }
    let Some(password) = next_line(&mut reader).await else { return };

    let accepted = !shared.reject_logins.load(Ordering::SeqCst)
        && user == shared.username
        && password == shared.password;
    if !accepted {
        let _ = write.write_all(b"Invalid Password\r\n").await;
        return;
    }
    if write.write_all(b"User Logged In\r\n").await.is_err() {
        return;
    }
    shared.logins.fetch_add(1, Ordering::SeqCst);

    while let Some(line) = next_line(&mut reader).await {
        if line.is_empty() {
            continue;
        }
        lock(&shared.received).push(line.clone());
        let reply = respond(&shared, &line);
        debug!(command = %line, reply = ?reply, "stub telnet");
        match reply {
            StubReply::Lines(lines) => {
                if send_lines(&mut write, &lines).await.is_err() {
                    return;
                }
            }
            StubReply::Delayed(delay, lines) => {
                tokio::time::sleep(delay).await;
                if send_lines(&mut write, &lines).await.is_err() {
                    return;
                }
            }
            StubReply::Silent => {}
            StubReply::Hangup => return,
        }
    }
}

fn respond(shared: &Shared, line: &str) -> StubReply {
    let upper = line.to_ascii_uppercase();
    {
        let mut overrides = lock(&shared.overrides);
        if let Some(pos) = overrides.iter().position(|o| upper.starts_with(&o.prefix)) {
            let entry = &mut overrides[pos];
            let reply = entry.reply.clone();
            if let Some(remaining) = entry.remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    overrides.remove(pos);
                }
            }
            return reply;
        }
    }

    match shared.dialect {
        StubDialect::Line => respond_line(shared, line, &upper),
        StubDialect::InSight => respond_in_sight(shared, line, &upper),
    }
}

fn respond_line(shared: &Shared, line: &str, upper: &str) -> StubReply {
    let argument = |verb: &str| line.get(verb.len()..).unwrap_or_default().trim().to_owned();
    if upper == "CAPTURE" {
        run_capture_hook(shared);
        StubReply::line("OK")
    } else if upper.starts_with("SET EXPOSURE ") {
        let value = argument("SET EXPOSURE");
        lock(&shared.exposure).clone_from(&value);
        StubReply::line(format!("OK {value}"))
    } else if upper.starts_with("SET GAIN ") {
        let value = argument("SET GAIN");
        lock(&shared.gain).clone_from(&value);
        StubReply::line(format!("OK {value}"))
    } else if upper == "GET STATUS" {
        StubReply::line(format!(
            "OK EXPOSURE={} GAIN={}",
            lock(&shared.exposure),
            lock(&shared.gain)
        ))
    } else if upper == "GET EXPOSURE" {
        StubReply::line(format!("OK {}", lock(&shared.exposure)))
    } else if upper == "GET GAIN" {
        StubReply::line(format!("OK {}", lock(&shared.gain)))
    } else {
        StubReply::line("ERR unknown command")
    }
}

fn respond_in_sight(shared: &Shared, line: &str, upper: &str) -> StubReply {
    let argument = |verb: &str| line.get(verb.len()..).unwrap_or_default().trim().to_owned();
    let ok_with = |data: String| StubReply::Lines(vec!["1".to_owned(), data]);
    if upper == "SE8" {
        run_capture_hook(shared);
        StubReply::line("1")
    } else if upper.starts_with("SFA005 ") {
        *lock(&shared.exposure) = argument("SFA005");
        StubReply::line("1")
    } else if upper.starts_with("SIB005 ") {
        *lock(&shared.gain) = argument("SIB005");
        StubReply::line("1")
    } else if upper == "GVA005" {
        ok_with(lock(&shared.exposure).clone())
    } else if upper == "GVB005" {
        ok_with(lock(&shared.gain).clone())
    } else if upper == "GI" {
        StubReply::Lines(vec![
            "1".to_owned(),
            format!("Serial Number: {DEFAULT_SERIAL}"),
            "Model: IS8502C".to_owned(),
        ])
    } else if upper.starts_with("GV") {
        ok_with("0".to_owned())
    } else {
        StubReply::line("0")
    }
}

fn run_capture_hook(shared: &Shared) {
    let hook = lock(&shared.on_capture).clone();
    if let Some(hook) = hook {
        hook();
    }
}

async fn send_lines(write: &mut OwnedWriteHalf, lines: &[String]) -> std::io::Result<()> {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push_str("\r\n");
    }
    write.write_all(out.as_bytes()).await
}

async fn next_line<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Option<String> {
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_owned()),
    }
}
