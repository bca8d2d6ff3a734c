//! Multi-process protocol: handshake, request/response framing, sessions,
//! async pipelining, cancellation, retryable handlers.
//!
//! REDESIGN (recorded in DESIGN.md): peers are tokio tasks over an
//! `AsyncRead + AsyncWrite` duplex rather than OS processes: a real child
//! pipe or, in tests, `tokio::io::duplex`. The wire contract itself
//! (greeting, request/response shapes, session table, pipelining,
//! cancellation, retry) is unchanged; only the scheduling primitive is
//! substituted.
//!
//! Two design choices fill gaps left implicit by the wire contract
//! (recorded in DESIGN.md): session ids are assigned by the *client* (an
//! incrementing counter), not echoed back by the server, since the wire
//! response shape carries no session field; and a request's `id` doubles
//! as the command name (`"StringId"` identifying which handler to
//! invoke), since no separate command field exists.

pub mod client;
pub mod server;
pub mod session;

use std::convert::TryFrom;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::pack::{PackReader, PackWriter};

pub use client::Client;
pub use server::{Server, ServerHandler};
pub use session::Session;

/// Greeting exchanged once at connection start, written as a single JSON
/// line for human diagnosability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Greeting {
    pub name: String,
    pub service: String,
    pub version: String,
}

pub async fn write_greeting<W: AsyncWrite + Unpin>(writer: &mut W, greeting: &Greeting) -> Result<()> {
    let mut line = serde_json::to_string(greeting).context("encoding greeting")?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await.context("writing greeting")?;
    writer.flush().await.context("flushing greeting")?;
    Ok(())
}

pub async fn read_greeting<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Greeting> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.context("reading greeting")?;
    if n == 0 {
        bail!("connection closed before greeting was received");
    }
    serde_json::from_str(line.trim_end()).context("decoding greeting")
}

/// Fail with a diagnostic hint when `actual` doesn't match what the
/// client expected to connect to.
pub fn check_greeting(expected: &Greeting, actual: &Greeting) -> Result<()> {
    if expected != actual {
        bail!(
            "greeting mismatch: expected {:?}, got {:?}\nHINT: is the same version installed on the local and remote host?",
            expected,
            actual
        );
    }
    Ok(())
}

/// Write one length-prefixed Pack frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).context("frame exceeds 4 GiB")?;
    writer.write_all(&len.to_be_bytes()).await.context("writing frame length")?;
    writer.write_all(payload).await.context("writing frame body")?;
    writer.flush().await.context("flushing frame")?;
    Ok(())
}

/// Read one length-prefixed frame. `Ok(None)` means the peer closed the
/// stream cleanly at a frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("reading frame length"),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.context("reading frame body")?;
    Ok(Some(payload))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Open,
    Process,
    Close,
    Cancel,
    Noop,
    Exit,
}

impl RequestType {
    fn to_tag(self) -> u64 {
        match self {
            RequestType::Open => 0,
            RequestType::Process => 1,
            RequestType::Close => 2,
            RequestType::Cancel => 3,
            RequestType::Noop => 4,
            RequestType::Exit => 5,
        }
    }

    fn from_tag(tag: u64) -> Result<Self> {
        Ok(match tag {
            0 => RequestType::Open,
            1 => RequestType::Process,
            2 => RequestType::Close,
            3 => RequestType::Cancel,
            4 => RequestType::Noop,
            5 => RequestType::Exit,
            other => bail!("unknown request type tag {}", other),
        })
    }
}

/// `{id, sessionId?, type, param?}`. `id` is the command name.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: String,
    pub session_id: Option<u64>,
    pub request_type: RequestType,
    pub param: Option<Vec<u8>>,
}

impl Request {
    pub fn to_pack(&self) -> Vec<u8> {
        let mut w = PackWriter::new();
        w.write_str(&self.id);
        w.write_bool(self.session_id.is_some());
        if let Some(session_id) = self.session_id {
            w.write_u64(session_id);
        }
        w.write_u64(self.request_type.to_tag());
        w.write_bool(self.param.is_some());
        if let Some(param) = &self.param {
            w.write_bytes(param);
        }
        w.end();
        w.into_bytes()
    }

    pub fn from_pack(buf: &[u8]) -> Result<Self> {
        let mut r = PackReader::new(buf);
        let id = r.read_str().context("request id")?;
        let has_session = r.read_bool().context("request session flag")?;
        let session_id = if has_session { Some(r.read_u64().context("request session id")?) } else { None };
        let request_type = RequestType::from_tag(r.read_u64().context("request type")?)?;
        let has_param = r.read_bool().context("request param flag")?;
        let param = if has_param { Some(r.read_bytes().context("request param")?) } else { None };
        r.read_end().context("request trailer")?;
        Ok(Self { id, session_id, request_type, param })
    }
}

/// `{type: data|error, data?, close?, errorCode?, errorMessage?, errorStack?}`
#[derive(Debug, Clone)]
pub enum ResponseKind {
    Data { data: Option<Vec<u8>>, close: bool },
    Error { code: u64, message: String, stack: String },
}

#[derive(Debug, Clone)]
pub struct Response {
    pub kind: ResponseKind,
}

impl Response {
    pub fn data(data: Option<Vec<u8>>, close: bool) -> Self {
        Self { kind: ResponseKind::Data { data, close } }
    }

    pub fn error(code: u64, message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self { kind: ResponseKind::Error { code, message: message.into(), stack: stack.into() } }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, ResponseKind::Error { .. })
    }

    pub fn to_pack(&self) -> Vec<u8> {
        let mut w = PackWriter::new();
        match &self.kind {
            ResponseKind::Data { data, close } => {
                w.write_bool(false);
                w.write_bool(data.is_some());
                if let Some(d) = data {
                    w.write_bytes(d);
                }
                w.write_bool(*close);
            }
            ResponseKind::Error { code, message, stack } => {
                w.write_bool(true);
                w.write_u64(*code);
                w.write_str(message);
                w.write_str(stack);
            }
        }
        w.end();
        w.into_bytes()
    }

    pub fn from_pack(buf: &[u8]) -> Result<Self> {
        let mut r = PackReader::new(buf);
        let is_error = r.read_bool().context("response error flag")?;
        let kind = if is_error {
            let code = r.read_u64().context("response error code")?;
            let message = r.read_str().context("response error message")?;
            let stack = r.read_str().context("response error stack")?;
            ResponseKind::Error { code, message, stack }
        } else {
            let has_data = r.read_bool().context("response data flag")?;
            let data = if has_data { Some(r.read_bytes().context("response data")?) } else { None };
            let close = r.read_bool().context("response close flag")?;
            ResponseKind::Data { data, close }
        };
        r.read_end().context("response trailer")?;
        Ok(Self { kind })
    }
}

/// A first-class retry policy: a list of delays between attempts, with
/// one more attempt than delays.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// `len(delays) + 1`.
    pub fn attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Sleep duration after the `attempt`th (0-based) failure, `None` once
    /// the list is exhausted.
    pub fn delay_after(&self, attempt: usize) -> Option<Duration> {
        self.delays.get(attempt).copied()
    }
}
