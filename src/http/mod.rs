//! Single-connection-reuse HTTP/1.1 client.
//!
//! A `hyper::Client` over an HTTPS connector gives keep-alive for free, so
//! the client here is a thin wrapper that adds the request/response shape
//! the S3 driver needs (ordered query, explicit header redaction for
//! logging) rather than reimplementing connection pooling.

mod connector;
pub mod uri;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use hyper::client::Client;
use hyper::{Body, Request as HyperRequest};
use openssl::ssl::{SslConnector, SslMethod};

use connector::HttpsConnector;

pub use uri::{uri_decode, uri_decode_bytes, uri_encode, uri_encode_bytes, DuplicateKeyError, EncodeMode, HttpQuery};

/// Request verbs the driver issues, as a closed enum rather than an
/// open-ended string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl Verb {
    fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Put => "PUT",
            Verb::Post => "POST",
            Verb::Delete => "DELETE",
            Verb::Head => "HEAD",
        }
    }
}

/// Header names never written to the log (case-insensitive), covering
/// auth headers generically rather than only S3's.
const REDACT_HEADERS: &[&str] = &["authorization", "x-amz-security-token", "proxy-authorization"];

fn is_redacted(name: &str) -> bool {
    REDACT_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Ordered, case-preserving header map. Kept as a `BTreeMap` (not
/// `http::HeaderMap`) so the S3 signer can iterate lower-cased,
/// sorted-by-name headers directly off the same structure that builds the
/// request.
#[derive(Debug, Clone, Default)]
pub struct HttpHeaders {
    inner: BTreeMap<String, String>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(name.into().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as a `log`-safe string: redacted headers show `<redacted>`.
    pub fn to_redacted_string(&self) -> String {
        self.inner
            .iter()
            .map(|(k, v)| {
                if is_redacted(k) {
                    format!("{}: <redacted>", k)
                } else {
                    format!("{}: {}", k, v)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Request body: either a fully-buffered payload (needed whenever the caller
/// must compute a content hash or content-length up front, as SigV4 does) or
/// a stream for large uploads.
pub enum HttpBody {
    Empty,
    Buffer(Bytes),
    Stream(Body),
}

impl HttpBody {
    pub fn len(&self) -> Option<usize> {
        match self {
            HttpBody::Empty => Some(0),
            HttpBody::Buffer(b) => Some(b.len()),
            HttpBody::Stream(_) => None,
        }
    }
}

impl From<HttpBody> for Body {
    fn from(b: HttpBody) -> Body {
        match b {
            HttpBody::Empty => Body::empty(),
            HttpBody::Buffer(bytes) => Body::from(bytes),
            HttpBody::Stream(s) => s,
        }
    }
}

/// An outgoing request: verb, path, headers, ordered query, optional body.
/// `path` and `query` are rendered separately so a signer can reconstruct
/// the exact canonical-request line from the same fields the client sends.
pub struct HttpRequest {
    pub verb: Verb,
    pub host: String,
    pub path: String,
    pub query: HttpQuery,
    pub headers: HttpHeaders,
    pub body: HttpBody,
}

impl HttpRequest {
    pub fn new(verb: Verb, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            verb,
            host: host.into(),
            path: path.into(),
            query: HttpQuery::new(),
            headers: HttpHeaders::new(),
            body: HttpBody::Empty,
        }
    }

    fn uri_string(&self, scheme: &str) -> String {
        let encoded_path = uri_encode(&self.path, EncodeMode::Path);
        if self.query.is_empty() {
            format!("{}://{}{}", scheme, self.host, encoded_path)
        } else {
            format!("{}://{}{}?{}", scheme, self.host, encoded_path, self.query.render())
        }
    }
}

/// A received response. The body is read lazily: `into_body_bytes` drives
/// the underlying stream to completion, holding the connection exclusively
/// until it returns.
pub struct HttpResponse {
    pub status: hyper::StatusCode,
    pub headers: HttpHeaders,
    body: Body,
}

impl HttpResponse {
    pub async fn into_body_bytes(self, max_len: usize) -> Result<Bytes> {
        let mut body = self.body;
        let mut buf = Vec::new();
        while let Some(chunk) = futures::StreamExt::next(&mut body).await {
            let chunk = chunk.context("reading response body")?;
            buf.extend_from_slice(&chunk);
            if buf.len() > max_len {
                buf.truncate(max_len);
                break;
            }
        }
        Ok(Bytes::from(buf))
    }

    pub fn into_body_stream(self) -> Body {
        self.body
    }
}

/// Thin wrapper over a `hyper::Client`: construction builds one
/// connector/client that hyper keeps alive across requests to the same
/// host.
pub struct HttpClient {
    client: Client<HttpsConnector, Body>,
    read_timeout: Duration,
}

impl HttpClient {
    pub fn new(read_timeout: Duration) -> Result<Self> {
        let ssl_connector = SslConnector::builder(SslMethod::tls())?.build();
        let https = HttpsConnector::new(ssl_connector);
        let client = Client::builder().build(https);
        Ok(Self { client, read_timeout })
    }

    /// Send `request` over HTTPS and return the response. `scheme` is always
    /// `https`; the engine has no plaintext-S3 use case.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let uri = request.uri_string("https");
        log::debug!(
            "http {} {} headers=[{}]",
            request.verb.as_str(),
            uri,
            request.headers.to_redacted_string()
        );

        let mut builder = HyperRequest::builder().method(request.verb.as_str()).uri(&uri);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        let hyper_request = builder.body(Body::from(request.body)).context("building http request")?;

        let response = tokio::time::timeout(self.read_timeout, self.client.request(hyper_request))
            .await
            .context("http request timed out")?
            .context("http request failed")?;

        let status = response.status();
        let mut headers = HttpHeaders::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.set(name.as_str(), v);
            }
        }

        Ok(HttpResponse {
            status,
            headers,
            body: response.into_body(),
        })
    }
}

/// Bail with a protocol-error message: verb, path, status, and a
/// size-capped body snippet.
pub fn bail_on_status(verb: Verb, path: &str, status: hyper::StatusCode, body: &[u8]) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let snippet_len = body.len().min(512);
    let snippet = String::from_utf8_lossy(&body[..snippet_len]);
    bail!(
        "http {} {} returned {}: {}",
        verb.as_str(),
        path,
        status,
        snippet
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_headers_are_hidden() {
        let mut h = HttpHeaders::new();
        h.set("Authorization", "AWS4-HMAC-SHA256 secret");
        h.set("Content-Type", "application/xml");
        let rendered = h.to_redacted_string();
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("application/xml"));
    }

    #[test]
    fn request_uri_renders_path_and_query() {
        let mut req = HttpRequest::new(Verb::Get, "bucket.s3.amazonaws.com", "/a/b c");
        req.query.add("list-type", "2").unwrap();
        let uri = req.uri_string("https");
        assert_eq!(uri, "https://bucket.s3.amazonaws.com/a/b%20c?list-type=2");
    }

    #[test]
    fn empty_query_omits_question_mark() {
        let req = HttpRequest::new(Verb::Head, "example.com", "/x");
        assert_eq!(req.uri_string("https"), "https://example.com/x");
    }
}
