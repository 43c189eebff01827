//! Minimal FTP client.
//!
//! Only what an uploader needs: login, CWD/CDUP/MKD, passive-mode STOR in ASCII
//! or image type, DELE and QUIT. Every network operation is bounded by the
//! configured timeout.

use crate::remote::{RemoteSession, SessionError, SessionResult};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;

pub const DEFAULT_PORT: u16 = 21;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest reply line accepted. Some servers send very long multi-line
/// banners, so this is generous.
pub const MAX_REPLY_LINE: usize = 100_000;

/// Data connection write size. The timeout applies to each chunk, so a slow
/// transfer that keeps moving never trips it.
pub const WRITE_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

impl FtpConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

// =============================================================================
// Replies
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub message: String,
}

impl Reply {
    /// First digit of the code: 1 preliminary, 2 completion, 3 intermediate,
    /// 4 transient failure, 5 permanent failure.
    pub fn class(&self) -> u16 {
        self.code / 100
    }

    fn into_error(self) -> SessionError {
        if self.class() >= 4 {
            SessionError::Rejected {
                code: self.code,
                message: self.message,
            }
        } else {
            SessionError::Protocol(format!("unexpected reply {} {}", self.code, self.message))
        }
    }

    fn expect_class(self, class: u16) -> SessionResult<Reply> {
        if self.class() == class {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(r: &mut R) -> SessionResult<String> {
    let mut buf = Vec::new();
    let n = (&mut *r)
        .take(MAX_REPLY_LINE as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Err(SessionError::Protocol("connection closed by server".into()));
    }
    if !buf.ends_with(b"\n") && n >= MAX_REPLY_LINE {
        return Err(SessionError::Protocol(format!(
            "reply line longer than {} bytes",
            MAX_REPLY_LINE
        )));
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn reply_code(line: &str) -> Option<u16> {
    let digits = line.get(..3)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Read one (possibly multi-line) reply.
///
/// A multi-line reply opens with `ddd-` and ends at the first line that starts
/// with the same code followed by a space.
pub async fn read_reply<R: AsyncBufRead + Unpin>(r: &mut R) -> SessionResult<Reply> {
    let first = read_line(r).await?;
    let code = reply_code(&first)
        .ok_or_else(|| SessionError::Protocol(format!("malformed reply: {:?}", first)))?;

    let mut message = first.get(4..).unwrap_or("").to_string();
    if first.as_bytes().get(3) == Some(&b'-') {
        let terminator = format!("{} ", code);
        loop {
            let line = read_line(r).await?;
            let last = line.starts_with(&terminator) || line == terminator.trim_end();
            message.push('\n');
            message.push_str(if last { line.get(4..).unwrap_or("") } else { &line });
            if last {
                break;
            }
        }
    }

    Ok(Reply { code, message })
}

/// Parse the data address from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
pub fn parse_pasv(message: &str) -> SessionResult<SocketAddr> {
    let bad = || SessionError::Protocol(format!("bad PASV reply: {}", message));

    let start = message
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(bad)?;
    let numbers: Vec<u8> = message[start..]
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .take(6)
        .map(|s| s.parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| bad())?;
    if numbers.len() != 6 {
        return Err(bad());
    }

    let ip = Ipv4Addr::new(numbers[0], numbers[1], numbers[2], numbers[3]);
    let port = u16::from(numbers[4]) << 8 | u16::from(numbers[5]);
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Re-terminate every line with CRLF, as an ASCII-type transfer requires.
///
/// A line already ending in CRLF is kept; a bare CR or LF is replaced; a final
/// unterminated line gets a CRLF too.
pub fn encode_text_lines(content: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(content.len() + content.len() / 32 + 2);
    for line in content.split_inclusive(|&b| b == b'\n') {
        if line.ends_with(b"\r\n") {
            out.put_slice(line);
            continue;
        }
        let body = match line.last() {
            Some(b'\r' | b'\n') => &line[..line.len() - 1],
            _ => line,
        };
        out.put_slice(body);
        out.put_slice(b"\r\n");
    }
    out.freeze()
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferType {
    Ascii,
    Image,
}

impl TransferType {
    fn code(self) -> &'static str {
        match self {
            TransferType::Ascii => "A",
            TransferType::Image => "I",
        }
    }
}

async fn within<T, E, F>(limit: Duration, fut: F) -> SessionResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<SessionError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(SessionError::Timeout(limit)),
    }
}

/// Write `data` in [`WRITE_CHUNK`] pieces, each bounded by `limit`, then close
/// the write side.
async fn write_chunked<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
    limit: Duration,
) -> SessionResult<()> {
    for chunk in data.chunks(WRITE_CHUNK) {
        within(limit, writer.write_all(chunk)).await?;
    }
    within(limit, writer.shutdown()).await
}

/// An FTP control connection in passive mode.
pub struct FtpSession {
    control: BufReader<TcpStream>,
    peer: IpAddr,
    timeout: Duration,
    transfer_type: Option<TransferType>,
}

impl FtpSession {
    /// Connect, read the greeting and log in.
    pub async fn connect(config: &FtpConfig) -> SessionResult<Self> {
        tracing::debug!(host = %config.host, port = config.port, "connecting");
        let stream = within(
            config.timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await?;
        let peer = stream.peer_addr()?.ip();

        let mut session = Self {
            control: BufReader::new(stream),
            peer,
            timeout: config.timeout,
            transfer_type: None,
        };

        let greeting = session.read_reply().await?.expect_class(2)?;
        tracing::debug!(code = greeting.code, "{}", greeting.message);

        session.login(&config.user, &config.password).await?;
        Ok(session)
    }

    async fn login(&mut self, user: &str, password: &str) -> SessionResult<()> {
        let reply = self.command(&format!("USER {}", user)).await?;
        match reply.class() {
            2 => return Ok(()),
            3 => {}
            _ => return Err(reply.into_error()),
        }
        self.send_line(&format!("PASS {}", password), "PASS ****")
            .await?;
        self.read_reply().await?.expect_class(2)?;
        tracing::debug!(user, "logged in");
        Ok(())
    }

    async fn send_line(&mut self, line: &str, shown: &str) -> SessionResult<()> {
        // A line break inside an argument would smuggle a second command.
        if line.contains(['\r', '\n']) {
            return Err(SessionError::Protocol(format!(
                "refusing to send a line break inside {:?}",
                shown
            )));
        }
        tracing::trace!("> {}", shown);
        let mut wire = Vec::with_capacity(line.len() + 2);
        wire.extend_from_slice(line.as_bytes());
        wire.extend_from_slice(b"\r\n");
        let stream = self.control.get_mut();
        within(self.timeout, stream.write_all(&wire)).await?;
        within(self.timeout, stream.flush()).await
    }

    async fn read_reply(&mut self) -> SessionResult<Reply> {
        let reply = within(self.timeout, read_reply(&mut self.control)).await?;
        tracing::trace!("< {} {}", reply.code, reply.message);
        Ok(reply)
    }

    async fn command(&mut self, line: &str) -> SessionResult<Reply> {
        self.send_line(line, line).await?;
        self.read_reply().await
    }

    async fn simple(&mut self, line: &str) -> SessionResult<()> {
        self.command(line).await?.expect_class(2).map(|_| ())
    }

    async fn set_type(&mut self, wanted: TransferType) -> SessionResult<()> {
        if self.transfer_type != Some(wanted) {
            self.simple(&format!("TYPE {}", wanted.code())).await?;
            self.transfer_type = Some(wanted);
        }
        Ok(())
    }

    async fn passive(&mut self) -> SessionResult<SocketAddr> {
        let reply = self.command("PASV").await?.expect_class(2)?;
        let mut addr = parse_pasv(&reply.message)?;
        // Servers behind NAT often advertise an unroutable address.
        if addr.ip().is_unspecified() {
            addr.set_ip(self.peer);
        }
        Ok(addr)
    }

    async fn store(&mut self, name: &str, kind: TransferType, data: &[u8]) -> SessionResult<()> {
        self.set_type(kind).await?;
        let addr = self.passive().await?;
        let mut data_conn = within(self.timeout, TcpStream::connect(addr)).await?;

        self.command(&format!("STOR {}", name))
            .await?
            .expect_class(1)?;

        write_chunked(&mut data_conn, data, self.timeout).await?;
        drop(data_conn);

        self.read_reply().await?.expect_class(2)?;
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for FtpSession {
    async fn change_dir(&mut self, name: &str) -> SessionResult<()> {
        self.simple(&format!("CWD {}", name)).await
    }

    async fn change_dir_up(&mut self) -> SessionResult<()> {
        self.simple("CDUP").await
    }

    async fn make_dir(&mut self, name: &str) -> SessionResult<()> {
        self.simple(&format!("MKD {}", name)).await
    }

    async fn store_text(&mut self, name: &str, content: &[u8]) -> SessionResult<()> {
        let lines = encode_text_lines(content);
        self.store(name, TransferType::Ascii, &lines).await
    }

    async fn store_binary(&mut self, name: &str, content: &[u8]) -> SessionResult<()> {
        self.store(name, TransferType::Image, content).await
    }

    async fn delete(&mut self, name: &str) -> SessionResult<()> {
        self.simple(&format!("DELE {}", name)).await
    }

    async fn quit(&mut self) -> SessionResult<()> {
        let result = self.simple("QUIT").await;
        let _ = self.control.get_mut().shutdown().await;
        result
    }
}
