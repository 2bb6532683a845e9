// Shared TCP transport for the line-oriented control connections.
//
// Both the Telnet command session and the FTP control connection speak
// CR/LF-terminated text. `LineStream` owns the socket plus a read buffer
// so partial lines survive across reads and cancelled reads lose nothing.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::error::Error;

const READ_CHUNK: usize = 4096;

/// Open a TCP connection bounded by `timeout`.
pub(crate) async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, Error> {
    let addr = format!("{host}:{port}");
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(Error::Connect {
                addr,
                reason: e.to_string(),
            });
        }
        Err(_) => {
            return Err(Error::Connect {
                addr,
                reason: format!("timed out after {} ms", timeout.as_millis()),
            });
        }
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Buffered line reader/writer over a TCP socket.
pub(crate) struct LineStream {
    stream: TcpStream,
    buf: BytesMut,
    peer: SocketAddr,
}

impl LineStream {
    pub(crate) async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, Error> {
        let stream = connect_tcp(host, port, timeout).await?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            peer,
        })
    }

    /// Address of the remote end.
    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write `line` followed by `terminator` and flush.
    pub(crate) async fn write_line(&mut self, line: &str, terminator: &str) -> Result<(), Error> {
        let mut out = Vec::with_capacity(line.len() + terminator.len());
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(terminator.as_bytes());
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read one LF-terminated line, stripping the trailing CR/LF.
    ///
    /// Cancel safe: bytes already received stay in the buffer.
    pub(crate) async fn read_line(&mut self) -> Result<String, Error> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let raw = self.buf.split_to(pos + 1);
                let line = String::from_utf8_lossy(&raw)
                    .trim_end_matches(['\r', '\n'])
                    .to_owned();
                trace!(line = %line, "read line");
                return Ok(line);
            }
            self.fill().await?;
        }
    }

    /// Read until `token` appears (prompts such as `User:` carry no newline).
    /// Returns everything up to and including the token, trimmed.
    pub(crate) async fn read_until(&mut self, token: &[u8]) -> Result<String, Error> {
        loop {
            if let Some(pos) = find(&self.buf, token) {
                let raw = self.buf.split_to(pos + token.len());
                return Ok(String::from_utf8_lossy(&raw).trim().to_owned());
            }
            self.fill().await?;
        }
    }

    /// Drop whatever has already been received but not consumed.
    pub(crate) fn discard_buffered(&mut self) -> usize {
        let n = self.buf.remaining();
        if n > 0 {
            trace!(bytes = n, "discarding unsolicited input");
            self.buf.clear();
        }
        n
    }

    /// Best-effort orderly shutdown of the write half.
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    async fn fill(&mut self) -> Result<(), Error> {
        self.buf.reserve(READ_CHUNK);
        let n = self.stream.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn find_token() {
        assert_eq!(find(b"Welcome\r\nUser: ", b"User:"), Some(9));
        assert_eq!(find(b"Password", b"User:"), None);
    }

    #[tokio::test]
    async fn reads_lines_and_prompts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"hello\r\nsecond\nUser: ").await.unwrap();
            let mut sink = [0u8; 16];
            let _ = sock.read(&mut sink).await;
        });

        let mut stream = LineStream::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(stream.read_line().await.unwrap(), "hello");
        assert_eq!(stream.read_line().await.unwrap(), "second");
        assert_eq!(stream.read_until(b"User:").await.unwrap(), "User:");
        stream.discard_buffered();
        assert_eq!(stream.discard_buffered(), 0);
    }

    #[tokio::test]
    async fn closed_connection_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });

        let mut stream = LineStream::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(matches!(stream.read_line().await, Err(Error::Closed)));
    }
}
