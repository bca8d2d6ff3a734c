//! Client-side session handle: `open` once, zero or more `process` calls
//! keyed by the session id, `close` (or `cancel`) to tear it down.

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Client, RequestType, Response, ResponseKind};

pub struct Session {
    pub id: u64,
    pub command: String,
    pub is_async: bool,
    closed: bool,
}

impl Session {
    /// Open a new session for `command`. `is_async` marks the session as
    /// one whose `process` calls may be pipelined ahead of their
    /// responses via `Session::send_process` + `Client::recv`.
    pub async fn open<S: AsyncRead + AsyncWrite + Send + Unpin + 'static>(
        client: &mut Client<S>,
        command: &str,
        param: Option<Vec<u8>>,
        is_async: bool,
    ) -> Result<(Self, Response)> {
        let session_id = client.next_session_id();
        let response = client.call(RequestType::Open, command, Some(session_id), param).await?;
        let closed = matches!(&response.kind, ResponseKind::Data { close: true, .. });
        Ok((Self { id: session_id, command: command.to_string(), is_async, closed }, response))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send a `process` request and wait for its response.
    pub async fn process<S: AsyncRead + AsyncWrite + Send + Unpin + 'static>(
        &mut self,
        client: &mut Client<S>,
        param: Option<Vec<u8>>,
    ) -> Result<Response> {
        let response = client.call(RequestType::Process, &self.command, Some(self.id), param).await?;
        if let ResponseKind::Data { close: true, .. } = &response.kind {
            self.closed = true;
        }
        Ok(response)
    }

    /// Enqueue a `process` request without waiting; pair with a later
    /// `Client::recv` to collect it (async pipelining).
    pub async fn send_process<S: AsyncRead + AsyncWrite + Send + Unpin + 'static>(
        &self,
        client: &mut Client<S>,
        param: Option<Vec<u8>>,
    ) -> Result<()> {
        client.send(RequestType::Process, &self.command, Some(self.id), param).await
    }

    pub async fn close<S: AsyncRead + AsyncWrite + Send + Unpin + 'static>(&mut self, client: &mut Client<S>) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        client.call(RequestType::Close, &self.command, Some(self.id), None).await?;
        self.closed = true;
        Ok(())
    }

    /// Best-effort cancellation: the server discards the session if the
    /// request arrives before the handler is invoked.
    pub async fn cancel<S: AsyncRead + AsyncWrite + Send + Unpin + 'static>(&mut self, client: &mut Client<S>) -> Result<()> {
        client.call(RequestType::Cancel, &self.command, Some(self.id), None).await?;
        Ok(())
    }
}
