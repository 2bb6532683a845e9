// Minimal FTP client
//
// Just the RFC 959 / RFC 3659 subset the camera's file store needs:
// login, binary mode, SIZE, MDTM, NLST, RETR, DELE, NOOP and QUIT, with
// passive-mode data connections. Every control read is bounded by the
// session timeout.

use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

use crate::error::Error;
use crate::transport::{LineStream, connect_tcp};

const CRLF: &str = "\r\n";
const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

/// A complete (possibly multi-line) server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reply {
    pub(crate) code: u16,
    pub(crate) text: String,
}

impl Reply {
    fn is_positive(&self) -> bool {
        (100..400).contains(&self.code)
    }

    fn into_error(self) -> Error {
        Error::Ftp {
            code: self.code,
            message: self.text,
        }
    }
}

/// One logged-in FTP control connection.
pub(crate) struct FtpSession {
    control: LineStream,
    timeout: Duration,
    data_host: IpAddr,
}

impl FtpSession {
    /// Open the control connection and consume the `220` greeting.
    pub(crate) async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, Error> {
        let control = LineStream::connect(host, port, timeout).await?;
        let data_host = control.peer().ip();
        let mut session = Self {
            control,
            timeout,
            data_host,
        };
        let greeting = session.read_reply().await.map_err(|e| Error::Connect {
            addr: format!("{host}:{port}"),
            reason: format!("no FTP greeting: {e}"),
        })?;
        if greeting.code != 220 {
            return Err(Error::Connect {
                addr: format!("{host}:{port}"),
                reason: format!("unexpected FTP greeting {} {}", greeting.code, greeting.text),
            });
        }
        Ok(session)
    }

    /// `USER` / `PASS`, then switch to binary transfers.
    pub(crate) async fn login(&mut self, username: &str, password: &str) -> Result<(), Error> {
        let reply = self.command(&format!("USER {username}")).await?;
        let reply = match reply.code {
            230 => reply,
            331 | 332 => self.command(&format!("PASS {password}")).await?,
            _ => return Err(auth_error(reply)),
        };
        if !matches!(reply.code, 230 | 202) {
            return Err(auth_error(reply));
        }
        self.expect("TYPE I", &[200]).await?;
        Ok(())
    }

    /// Size in bytes, or `None` when the file does not exist.
    pub(crate) async fn size(&mut self, path: &str) -> Result<Option<u64>, Error> {
        let reply = self.command(&format!("SIZE {path}")).await?;
        match reply.code {
            213 => reply
                .text
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| Error::Protocol { raw: reply.text }),
            550 => Ok(None),
            _ => Err(reply.into_error()),
        }
    }

    /// Modification time, or `None` when the server cannot report one.
    pub(crate) async fn mdtm(&mut self, path: &str) -> Result<Option<DateTime<Utc>>, Error> {
        let reply = self.command(&format!("MDTM {path}")).await?;
        if reply.code != 213 {
            trace!(code = reply.code, "MDTM unavailable");
            return Ok(None);
        }
        parse_mdtm(&reply.text)
            .map(Some)
            .ok_or(Error::Protocol { raw: reply.text })
    }

    /// Names in `dir` (base names only).
    pub(crate) async fn nlst(&mut self, dir: &str) -> Result<Vec<String>, Error> {
        let cmd = if dir.is_empty() {
            "NLST".to_owned()
        } else {
            format!("NLST {dir}")
        };
        let raw = self.transfer(&cmd).await?;
        let text = String::from_utf8_lossy(&raw);
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| l.rsplit('/').next().unwrap_or(l).to_owned())
            .collect())
    }

    /// Download `path` completely.
    pub(crate) async fn retr(&mut self, path: &str) -> Result<Bytes, Error> {
        self.transfer(&format!("RETR {path}")).await
    }

    pub(crate) async fn dele(&mut self, path: &str) -> Result<(), Error> {
        self.expect(&format!("DELE {path}"), &[250]).await.map(drop)
    }

    pub(crate) async fn noop(&mut self) -> Result<(), Error> {
        self.expect("NOOP", &[200]).await.map(drop)
    }

    /// Polite `QUIT`; errors are irrelevant at this point.
    pub(crate) async fn quit(mut self) {
        let _ = tokio::time::timeout(QUIT_TIMEOUT.min(self.timeout), async {
            self.control.write_line("QUIT", CRLF).await?;
            self.control.read_line().await
        })
        .await;
        self.control.shutdown().await;
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Passive-mode transfer: `PASV`, open data connection, send `cmd`,
    /// read to EOF, then the completion reply.
    async fn transfer(&mut self, cmd: &str) -> Result<Bytes, Error> {
        let pasv = self.expect("PASV", &[227]).await?;
        let port = parse_pasv_port(&pasv.text).ok_or(Error::Protocol {
            raw: pasv.text.clone(),
        })?;
        // Cameras often advertise an unroutable address in 227; always use
        // the control connection's peer.
        let host = self.data_host.to_string();
        let mut data = connect_tcp(&host, port, self.timeout).await?;

        let start = self.command(cmd).await?;
        if !matches!(start.code, 125 | 150) {
            return Err(start.into_error());
        }

        let mut buf = Vec::new();
        tokio::time::timeout(self.timeout, data.read_to_end(&mut buf))
            .await
            .map_err(|_| Error::timeout(self.timeout))??;
        drop(data);

        let done = self.read_reply().await?;
        if !matches!(done.code, 226 | 250) {
            return Err(done.into_error());
        }
        debug!(command = %cmd, bytes = buf.len(), "transfer complete");
        Ok(Bytes::from(buf))
    }

    async fn command(&mut self, cmd: &str) -> Result<Reply, Error> {
        let shown = if cmd.starts_with("PASS ") { "PASS ****" } else { cmd };
        trace!(command = %shown, "ftp >");
        self.control.write_line(cmd, CRLF).await?;
        self.read_reply().await
    }

    async fn expect(&mut self, cmd: &str, codes: &[u16]) -> Result<Reply, Error> {
        let reply = self.command(cmd).await?;
        if codes.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(reply.into_error())
        }
    }

    async fn read_reply(&mut self) -> Result<Reply, Error> {
        let timeout = self.timeout;
        let control = &mut self.control;
        let read = async {
            let first = control.read_line().await?;
            let (code, sep, text) = split_reply_line(&first).ok_or_else(|| Error::Protocol {
                raw: first.clone(),
            })?;
            let mut text = text.to_owned();
            if sep == '-' {
                let terminator = format!("{code} ");
                loop {
                    let line = control.read_line().await?;
                    if line.starts_with(&terminator) || line == code.to_string() {
                        text.push('\n');
                        text.push_str(line.get(4..).unwrap_or_default());
                        break;
                    }
                    text.push('\n');
                    text.push_str(&line);
                }
            }
            Ok::<_, Error>(Reply { code, text })
        };
        let reply = tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| Error::timeout(timeout))??;
        trace!(code = reply.code, text = %reply.text, "ftp <");
        if !reply.is_positive() {
            debug!(code = reply.code, text = %reply.text, "negative ftp reply");
        }
        Ok(reply)
    }
}

fn auth_error(reply: Reply) -> Error {
    if reply.code == 530 {
        Error::Authentication {
            message: reply.text,
        }
    } else {
        reply.into_error()
    }
}

/// `"213 text"` → `(213, ' ', "text")`; `"211-first"` → `(211, '-', "first")`.
fn split_reply_line(line: &str) -> Option<(u16, char, &str)> {
    let code = line.get(..3)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let code = code.parse().ok()?;
    let rest = line.get(3..)?;
    let mut chars = rest.chars();
    match chars.next() {
        None => Some((code, ' ', "")),
        Some(sep @ (' ' | '-')) => Some((code, sep, chars.as_str())),
        Some(_) => None,
    }
}

/// Port from `Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
fn parse_pasv_port(text: &str) -> Option<u16> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let numbers: Vec<u16> = text
        .get(start..)?
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .take(6)
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    let [_, _, _, _, hi, lo] = numbers.as_slice() else {
        return None;
    };
    if *hi > 255 || *lo > 255 {
        return None;
    }
    Some(hi * 256 + lo)
}

/// `YYYYMMDDHHMMSS[.sss]` in UTC.
fn parse_mdtm(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (text, None),
    };
    let mut stamp = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S").ok()?;
    if let Some(fraction) = fraction {
        if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let digits: String = fraction.chars().chain(std::iter::repeat('0')).take(9).collect();
        let nanos: i64 = digits.parse().ok()?;
        stamp += chrono::Duration::nanoseconds(nanos);
    }
    Some(stamp.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn reply_line_splitting() {
        assert_eq!(split_reply_line("213 1024"), Some((213, ' ', "1024")));
        assert_eq!(split_reply_line("211-Features:"), Some((211, '-', "Features:")));
        assert_eq!(split_reply_line("200"), Some((200, ' ', "")));
        assert_eq!(split_reply_line("ab1 nope"), None);
        assert_eq!(split_reply_line("2000"), None);
    }

    #[test]
    fn pasv_port_is_extracted() {
        assert_eq!(
            parse_pasv_port("Entering Passive Mode (192,168,0,5,195,80)."),
            Some(195 * 256 + 80)
        );
        assert_eq!(parse_pasv_port("Entering Passive Mode 10,0,0,1,4,1"), Some(1025));
        assert_eq!(parse_pasv_port("Entering Passive Mode (1,2,3)"), None);
        assert_eq!(parse_pasv_port("(1,2,3,4,300,1)"), None);
    }

    #[test]
    fn mdtm_with_and_without_fraction() {
        let plain = parse_mdtm("20240301120005").unwrap();
        assert_eq!(plain.to_rfc3339(), "2024-03-01T12:00:05+00:00");

        let fractional = parse_mdtm("20240301120005.25").unwrap();
        assert_eq!(fractional.nanosecond(), 250_000_000);
        assert!(fractional > plain);

        assert!(parse_mdtm("2024").is_none());
        assert!(parse_mdtm("20240301120005.x").is_none());
    }
}
