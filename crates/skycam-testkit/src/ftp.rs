// Stub FTP server
//
// Serves an in-memory file map over the subset of FTP the retrieval
// channel uses. The 227 reply advertises an unroutable address on purpose:
// clients must connect back to the control connection's peer.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::lock;

const DATA_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct StubFile {
    bytes: Bytes,
    modified: DateTime<Utc>,
}

struct Shared {
    username: String,
    password: String,
    files: Mutex<BTreeMap<String, StubFile>>,
    report_mtime: AtomicBool,
    truncate_transfers: AtomicUsize,
    retrievals: AtomicUsize,
    logins: AtomicUsize,
    commands: Mutex<Vec<String>>,
    kill: Mutex<CancellationToken>,
}

/// Stub camera file store.
pub struct FtpStub {
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl FtpStub {
    /// Bind an ephemeral port. Credentials are `admin` with an empty
    /// password.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            username: "admin".to_owned(),
            password: String::new(),
            files: Mutex::new(BTreeMap::new()),
            report_mtime: AtomicBool::new(true),
            truncate_transfers: AtomicUsize::new(0),
            retrievals: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
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

    /// Store (or overwrite) a file. Modification times are strictly
    /// increasing across puts, at millisecond resolution.
    pub fn put(&self, path: &str, bytes: impl Into<Bytes>) {
        let mut files = lock(&self.shared.files);
        let latest = files.values().map(|f| f.modified).max();
        let now = truncate_to_millis(Utc::now());
        let modified = match latest {
            Some(latest) if latest >= now => latest + TimeDelta::milliseconds(1),
            _ => now,
        };
        files.insert(
            normalize(path),
            StubFile {
                bytes: bytes.into(),
                modified,
            },
        );
    }

    /// Overwrite a file keeping its previous modification time.
    pub fn put_with_mtime_of(&self, path: &str, bytes: impl Into<Bytes>, like: &str) {
        let mut files = lock(&self.shared.files);
        let modified = files
            .get(&normalize(like))
            .map_or_else(|| truncate_to_millis(Utc::now()), |f| f.modified);
        files.insert(
            normalize(path),
            StubFile {
                bytes: bytes.into(),
                modified,
            },
        );
    }

    pub fn remove(&self, path: &str) {
        lock(&self.shared.files).remove(&normalize(path));
    }

    pub fn contains(&self, path: &str) -> bool {
        lock(&self.shared.files).contains_key(&normalize(path))
    }

    pub fn file_names(&self) -> Vec<String> {
        lock(&self.shared.files).keys().cloned().collect()
    }

    /// Answer `MDTM` with 550 when disabled.
    pub fn report_mtime(&self, enabled: bool) {
        self.shared.report_mtime.store(enabled, Ordering::SeqCst);
    }

    /// Send only half of the next `count` downloads.
    pub fn truncate_next_transfers(&self, count: usize) {
        self.shared.truncate_transfers.store(count, Ordering::SeqCst);
    }

    /// Completed `RETR` commands.
    pub fn retrievals(&self) -> usize {
        self.shared.retrievals.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> usize {
        self.shared.logins.load(Ordering::SeqCst)
    }

    /// Every control command received, passwords included.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.shared.commands).clone()
    }

    /// Close every open control connection.
    pub fn drop_connections(&self) {
        let mut kill = lock(&self.shared.kill);
        kill.cancel();
        *kill = self.shutdown.child_token();
    }
}

impl Drop for FtpStub {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve(socket: TcpStream, shared: Arc<Shared>) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);
    if reply(&mut write, "220 Stub In-Sight FTP ready").await.is_err() {
        return;
    }

    let mut user: Option<String> = None;
    let mut logged_in = false;
    let mut passive: Option<TcpListener> = None;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let line = line.trim_end_matches(['\r', '\n']).to_owned();
        lock(&shared.commands).push(line.clone());
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim().to_owned()),
            None => (line.to_ascii_uppercase(), String::new()),
        };
        debug!(verb = %verb, arg = %arg, "stub ftp");

        let outcome = match verb.as_str() {
            "USER" => {
                user = Some(arg);
                reply(&mut write, "331 Password required").await
            }
            "PASS" => {
                if user.as_deref() == Some(shared.username.as_str()) && arg == shared.password {
                    logged_in = true;
                    shared.logins.fetch_add(1, Ordering::SeqCst);
                    reply(&mut write, "230 Logged in").await
                } else {
                    reply(&mut write, "530 Login incorrect").await
                }
            }
            "QUIT" => {
                let _ = reply(&mut write, "221 Bye").await;
                return;
            }
            "NOOP" => reply(&mut write, "200 NOOP ok").await,
            _ if !logged_in => reply(&mut write, "530 Not logged in").await,
            "TYPE" => reply(&mut write, "200 Type set").await,
            "SIZE" => match file(&shared, &arg) {
                Some(f) => reply(&mut write, &format!("213 {}", f.bytes.len())).await,
                None => reply(&mut write, "550 No such file").await,
            },
            "MDTM" => match file(&shared, &arg) {
                Some(f) if shared.report_mtime.load(Ordering::SeqCst) => {
                    let stamp = f.modified.format("%Y%m%d%H%M%S%.3f");
                    reply(&mut write, &format!("213 {stamp}")).await
                }
                _ => reply(&mut write, "550 Not available").await,
            },
            "PASV" => match TcpListener::bind("127.0.0.1:0").await {
                Ok(listener) => {
                    let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();
                    passive = Some(listener);
                    reply(
                        &mut write,
                        &format!(
                            "227 Entering Passive Mode (10,255,0,1,{},{})",
                            port / 256,
                            port % 256
                        ),
                    )
                    .await
                }
                Err(_) => reply(&mut write, "425 Cannot open data connection").await,
            },
            "RETR" => {
                let Some(found) = file(&shared, &arg) else {
                    passive = None;
                    if reply(&mut write, "550 No such file").await.is_err() {
                        return;
                    }
                    continue;
                };
                let mut payload = found.bytes.clone();
                let truncate = shared
                    .truncate_transfers
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if truncate {
                    payload = payload.slice(..payload.len() / 2);
                }
                let sent = send_data(&mut write, passive.take(), &payload).await;
                if sent {
                    shared.retrievals.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
            "NLST" => {
                let listing: String = names_in(&shared, &arg)
                    .into_iter()
                    .map(|n| format!("{n}\r\n"))
                    .collect();
                send_data(&mut write, passive.take(), listing.as_bytes()).await;
                Ok(())
            }
            "DELE" => {
                let removed = lock(&shared.files).remove(&normalize(&arg)).is_some();
                if removed {
                    reply(&mut write, "250 Deleted").await
                } else {
                    reply(&mut write, "550 No such file").await
                }
            }
            _ => reply(&mut write, "502 Command not implemented").await,
        };
        if outcome.is_err() {
            return;
        }
    }
}

/// 150, payload over the passive connection, then 226.
async fn send_data(write: &mut OwnedWriteHalf, passive: Option<TcpListener>, payload: &[u8]) -> bool {
    let Some(listener) = passive else {
        let _ = reply(write, "425 Use PASV first").await;
        return false;
    };
    let Ok(Ok((mut data, _))) = tokio::time::timeout(DATA_ACCEPT_TIMEOUT, listener.accept()).await
    else {
        let _ = reply(write, "425 Data connection timed out").await;
        return false;
    };
    if reply(write, "150 Opening BINARY mode data connection").await.is_err() {
        return false;
    }
    let ok = data.write_all(payload).await.is_ok();
    let _ = data.shutdown().await;
    drop(data);
    if ok {
        reply(write, "226 Transfer complete").await.is_ok()
    } else {
        let _ = reply(write, "426 Transfer aborted").await;
        false
    }
}

async fn reply(write: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    write.write_all(format!("{line}\r\n").as_bytes()).await
}

fn file(shared: &Shared, path: &str) -> Option<StubFile> {
    lock(&shared.files).get(&normalize(path)).cloned()
}

fn names_in(shared: &Shared, dir: &str) -> Vec<String> {
    let dir = normalize(dir);
    let prefix = if dir.is_empty() {
        String::new()
    } else {
        format!("{dir}/")
    };
    lock(&shared.files)
        .keys()
        .filter_map(|k| k.strip_prefix(&prefix))
        .filter(|rest| !rest.contains('/'))
        .map(str::to_owned)
        .collect()
}

fn normalize(path: &str) -> String {
    path.trim().trim_matches('/').to_owned()
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    let millis = at.timestamp_millis();
    DateTime::from_timestamp_millis(millis).unwrap_or(at)
}
