//! In-process stub In-Sight camera for integration tests.
//!
//! [`StubCamera`] pairs a Telnet command server ([`TelnetStub`]) with an FTP
//! file store ([`FtpStub`]), both bound to ephemeral ports on `127.0.0.1`.
//! With [`StubCamera::with_frames`] every accepted capture command writes a
//! fresh image to the file store, like the real camera does.
//!
//! ```no_run
//! # async fn demo() -> std::io::Result<()> {
//! use skycam_testkit::{StubCamera, StubDialect, StubReply};
//!
//! let camera = StubCamera::with_frames(StubDialect::Line).await?;
//! camera.telnet.reply("SET GAIN", StubReply::line("ERR invalid"));
//! # Ok(())
//! # }
//! ```

mod ftp;
mod telnet;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use ftp::FtpStub;
pub use telnet::{DEFAULT_BANNER, DEFAULT_SERIAL, StubDialect, StubReply, TelnetStub};

/// File the stub camera writes on capture.
pub const IMAGE_NAME: &str = "image.bmp";

/// Telnet command port plus FTP file store.
pub struct StubCamera {
    pub telnet: TelnetStub,
    pub ftp: Arc<FtpStub>,
    captures: Arc<AtomicU64>,
}

impl StubCamera {
    /// Both servers, with no capture side effects.
    pub async fn start(dialect: StubDialect) -> std::io::Result<Self> {
        Ok(Self {
            telnet: TelnetStub::start(dialect).await?,
            ftp: Arc::new(FtpStub::start().await?),
            captures: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Both servers; each capture overwrites [`IMAGE_NAME`] with new content.
    pub async fn with_frames(dialect: StubDialect) -> std::io::Result<Self> {
        let camera = Self::start(dialect).await?;
        let ftp = Arc::clone(&camera.ftp);
        let captures = Arc::clone(&camera.captures);
        camera.telnet.on_capture(move || {
            let n = captures.fetch_add(1, Ordering::SeqCst) + 1;
            ftp.put(IMAGE_NAME, frame_bytes(n));
        });
        Ok(camera)
    }

    pub fn command_port(&self) -> u16 {
        self.telnet.port()
    }

    pub fn ftp_port(&self) -> u16 {
        self.ftp.port()
    }

    /// Capture commands that produced a frame.
    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::SeqCst)
    }

    /// Close every open connection on both servers.
    pub fn drop_connections(&self) {
        self.telnet.drop_connections();
        self.ftp.drop_connections();
    }
}

/// Deterministic fake BMP payload for frame `n`.
pub fn frame_bytes(n: u64) -> Vec<u8> {
    let mut bytes = b"BM".to_vec();
    bytes.extend_from_slice(&n.to_le_bytes());
    bytes.extend(std::iter::repeat_n(0xAB, 54));
    bytes
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
