//! Protocol server: one connection's command loop. Greeting, then frames
//! in strict request/response lockstep, cancellation bookkeeping, and
//! retryable-handler replay.
//!
//! The handler itself owns whatever per-session state `open` creates,
//! an opaque session-data value retained on the server; this module
//! only drives the wire protocol around it.

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use super::{read_frame, write_frame, write_greeting, Greeting, Request, RequestType, Response, RetryPolicy};
use crate::error::retry_exhausted_message;

#[async_trait]
pub trait ServerHandler: Send {
    /// Handle an `open` request for a new session.
    async fn open(&mut self, session_id: u64, command: &str, param: Option<Vec<u8>>) -> Result<(Vec<u8>, bool)>;

    /// Handle a `process` request. `session_id` is `None` for a stateless
    /// command.
    async fn process(&mut self, session_id: Option<u64>, command: &str, param: Option<Vec<u8>>) -> Result<(Vec<u8>, bool)>;

    async fn close(&mut self, session_id: u64, command: &str) -> Result<()>;

    /// Whether `command` should be retried per the server's `RetryPolicy`
    /// on failure.
    fn is_retryable(&self, command: &str) -> bool {
        let _ = command;
        false
    }
}

pub struct Server<H> {
    handler: H,
    retry_policy: RetryPolicy,
    cancelled: HashSet<u64>,
}

impl<H: ServerHandler> Server<H> {
    pub fn new(handler: H, retry_policy: RetryPolicy) -> Self {
        Self { handler, retry_policy, cancelled: HashSet::new() }
    }

    /// Drive the connection to completion: write the greeting, then loop
    /// on request frames until `exit` or the peer closes the stream.
    pub async fn serve<S: AsyncRead + AsyncWrite + Send + Unpin>(mut self, io: S, greeting: Greeting) -> Result<()> {
        let (read_half, mut write_half) = tokio::io::split(io);
        let mut reader = BufReader::new(read_half);

        write_greeting(&mut write_half, &greeting).await?;

        loop {
            let frame = match read_frame(&mut reader).await? {
                Some(bytes) => bytes,
                None => break,
            };
            let request = Request::from_pack(&frame).context("decoding request")?;

            match request.request_type {
                RequestType::Exit => {
                    write_frame(&mut write_half, &Response::data(None, false).to_pack()).await?;
                    break;
                }
                RequestType::Noop => {
                    write_frame(&mut write_half, &Response::data(None, false).to_pack()).await?;
                }
                RequestType::Cancel => {
                    if let Some(session_id) = request.session_id {
                        self.cancelled.insert(session_id);
                    }
                    write_frame(&mut write_half, &Response::data(None, false).to_pack()).await?;
                }
                RequestType::Close => {
                    let result = match request.session_id {
                        Some(session_id) => {
                            self.cancelled.remove(&session_id);
                            self.handler.close(session_id, &request.id).await
                        }
                        None => Err(anyhow!("close requires a session id")),
                    };
                    let response = match result {
                        Ok(()) => Response::data(None, true),
                        Err(err) => error_response(&err),
                    };
                    write_frame(&mut write_half, &response.to_pack()).await?;
                }
                RequestType::Open | RequestType::Process => {
                    if let Some(session_id) = request.session_id {
                        if self.cancelled.contains(&session_id) {
                            let response = error_response(&anyhow!("session {} was cancelled", session_id));
                            write_frame(&mut write_half, &response.to_pack()).await?;
                            continue;
                        }
                    }
                    let response = self.run_with_retry(&request).await;
                    write_frame(&mut write_half, &response.to_pack()).await?;
                }
            }
        }

        Ok(())
    }

    /// Invoke the handler for an `open`/`process` request, retrying up to
    /// `RetryPolicy::attempts()` times when the command is retryable. Per
    /// attempt after the first, the detailed error is replaced with a
    /// `[RETRY DETAIL OMITTED]` marker in the log; the final failure
    /// surfaces the full error via `retry_exhausted_message`.
    async fn run_with_retry(&mut self, request: &Request) -> Response {
        let retryable = self.handler.is_retryable(&request.id);
        let attempts = if retryable { self.retry_policy.attempts() } else { 1 };

        let mut last_err = None;
        for attempt in 0..attempts {
            let outcome = match request.request_type {
                RequestType::Open => match request.session_id {
                    Some(session_id) => self.handler.open(session_id, &request.id, request.param.clone()).await,
                    None => return error_response(&anyhow!("open requires a session id")),
                },
                RequestType::Process => self.handler.process(request.session_id, &request.id, request.param.clone()).await,
                _ => unreachable!("run_with_retry only called for open/process"),
            };

            match outcome {
                Ok((data, close)) => return Response::data(Some(data), close),
                Err(err) => {
                    if attempt + 1 < attempts {
                        log::warn!("retry {} of {} for '{}': [RETRY DETAIL OMITTED]", attempt + 1, attempts - 1, request.id);
                        if let Some(delay) = self.retry_policy.delay_after(attempt) {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    last_err = Some(err);
                }
            }
        }

        let err = last_err.expect("loop runs at least once");
        let message = retry_exhausted_message(attempts, &err);
        Response::error(0, message, format!("{:?}", err))
    }
}

fn error_response(err: &anyhow::Error) -> Response {
    Response::error(0, err.to_string(), format!("{:?}", err))
}
