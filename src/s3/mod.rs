//! S3-compatible object storage driver.
//!
//! One `Arc`-shared driver owns the HTTP client, credentials, and signing
//! key cache; credentials are refreshed lazily right before a request is
//! signed. Covers canonical-request layout, credential flows, listing
//! pagination, and batch-delete chunking/retry over the crate's async
//! `HttpClient`.

pub mod credentials;
pub mod sigv4;
pub mod xml;

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use openssl::hash::MessageDigest;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::io::StreamReader;

use crate::http::{uri_encode, EncodeMode, HttpBody, HttpClient, HttpHeaders, HttpQuery, HttpRequest, Verb};
use crate::storage::{BoxedRead, BoxedWrite, EntryType, FeatureBits, InfoLevel, ListOptions, ListSink, Storage, StorageInfo, WriteOptions};
use credentials::{fetch_auto_credentials, fetch_webid_credentials, CredentialSource, Credentials};
use sigv4::{sha256_hex, sign, SignRequest, SigningKeyCache};

const DELETE_MAX: usize = 1000;
const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriStyle {
    Path,
    Host,
}

/// Static construction parameters: the S3-specific slice of a
/// pre-parsed configuration struct.
pub struct S3Config {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub uri_style: UriStyle,
    pub credential_source: CredentialSource,
    pub part_size: u64,
    pub kms_key_id: Option<String>,
    pub sse_customer_key: Option<String>,
    pub tag: Option<String>,
    pub requester_pays: bool,
    pub timeout: Duration,
}

struct Inner {
    http: HttpClient,
    cred_http: HttpClient,
    bucket: String,
    region: String,
    uri_style: UriStyle,
    bucket_endpoint: String,
    credential_source: Mutex<CredentialSourceState>,
    credentials: Mutex<Option<Credentials>>,
    signing_key: Mutex<SigningKeyCache>,
    part_size: u64,
    kms_key_id: Option<String>,
    sse_customer_key: Option<String>,
    sse_customer_key_md5: Option<String>,
    tag: Option<String>,
    requester_pays: bool,
}

enum CredentialSourceState {
    Shared,
    Auto { role: Option<String> },
    WebId { role_arn: String, token_file: String },
}

pub struct S3Storage {
    inner: Arc<Inner>,
}

impl S3Storage {
    pub fn new(config: S3Config) -> Result<Self> {
        let bucket_endpoint = match config.uri_style {
            UriStyle::Host => format!("{}.{}", config.bucket, config.endpoint),
            UriStyle::Path => config.endpoint.clone(),
        };

        let (credentials, state) = match config.credential_source {
            CredentialSource::Shared(creds) => (Some(creds), CredentialSourceState::Shared),
            CredentialSource::Auto { role } => (None, CredentialSourceState::Auto { role }),
            CredentialSource::WebId { role_arn, token_file } => {
                (None, CredentialSourceState::WebId { role_arn, token_file })
            }
        };

        let sse_customer_key_md5 = config
            .sse_customer_key
            .as_ref()
            .map(|k| -> Result<String> {
                let raw = base64::decode(k).context("decoding sse customer key")?;
                let digest = openssl::hash::hash(MessageDigest::md5(), &raw)?;
                Ok(base64::encode(digest))
            })
            .transpose()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http: HttpClient::new(config.timeout)?,
                cred_http: HttpClient::new(config.timeout)?,
                bucket: config.bucket,
                region: config.region,
                uri_style: config.uri_style,
                bucket_endpoint,
                credential_source: Mutex::new(state),
                credentials: Mutex::new(credentials),
                signing_key: Mutex::new(SigningKeyCache::new()),
                part_size: if config.part_size == 0 { DEFAULT_PART_SIZE } else { config.part_size },
                kms_key_id: config.kms_key_id,
                sse_customer_key: config.sse_customer_key,
                sse_customer_key_md5,
                tag: config.tag,
                requester_pays: config.requester_pays,
            }),
        })
    }
}

impl Inner {
    fn request_path(&self, path: &str) -> String {
        match self.uri_style {
            UriStyle::Path => format!("/{}{}", self.bucket, path),
            UriStyle::Host => path.to_string(),
        }
    }

    async fn ensure_credentials(&self) -> Result<Credentials> {
        let mut creds_guard = self.credentials.lock().await;
        let needs_refresh = match &*creds_guard {
            None => true,
            Some(c) => c.needs_refresh(),
        };

        if needs_refresh {
            let mut state = self.credential_source.lock().await;
            let fresh = match &mut *state {
                CredentialSourceState::Shared => {
                    bail!("shared credentials must be supplied at construction time");
                }
                CredentialSourceState::Auto { role } => {
                    fetch_auto_credentials(&self.cred_http, role, Duration::from_secs(30)).await?
                }
                CredentialSourceState::WebId { role_arn, token_file } => {
                    fetch_webid_credentials(&self.cred_http, role_arn, token_file).await?
                }
            };
            self.signing_key.lock().await.invalidate();
            *creds_guard = Some(fresh);
        }

        Ok(creds_guard.clone().expect("credentials set above"))
    }

    fn amz_date_now() -> String {
        // RFC3339-ish "YYYYMMDDTHHMMSSZ"; SystemTime has no calendar support, so
        // format through a tiny manual breakdown (the crate otherwise avoids a
        // calendar dependency for this one call site).
        let secs = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs() as i64;
        let days = secs.div_euclid(86400);
        let rem = secs.rem_euclid(86400);
        let (y, m, d) = civil_from_days(days);
        format!(
            "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
            y,
            m,
            d,
            rem / 3600,
            (rem % 3600) / 60,
            rem % 60
        )
    }

    async fn request(
        &self,
        verb: Verb,
        path: &str,
        query: HttpQuery,
        content: Option<Vec<u8>>,
        content_md5: bool,
        opts: WriteOptions,
        allow_missing: bool,
    ) -> Result<(hyper::StatusCode, HttpHeaders, Vec<u8>)> {
        let credentials = self.ensure_credentials().await?;

        let signed_path = self.request_path(path);
        // Must match what `HttpRequest::uri_string` puts on the wire for this
        // same `signed_path`, or the signature never validates.
        let encoded_path = uri_encode(&signed_path, EncodeMode::Path);

        let mut headers = HttpHeaders::new();
        headers.set("host", &self.bucket_endpoint);
        headers.set("content-length", content.as_ref().map(|c| c.len()).unwrap_or(0).to_string());

        if let Some(token) = &credentials.security_token {
            headers.set("x-amz-security-token", token);
        }
        if content_md5 {
            let bytes = content.as_deref().unwrap_or(&[]);
            headers.set("content-md5", base64::encode(openssl::hash::hash(MessageDigest::md5(), bytes)?));
        }
        if self.requester_pays {
            headers.set("x-amz-request-payer", "requester");
        }
        if opts.sse_kms {
            if let Some(kms) = &self.kms_key_id {
                headers.set("x-amz-server-side-encryption", "aws:kms");
                headers.set("x-amz-server-side-encryption-aws-kms-key-id", kms);
            }
        }
        if opts.sse_c {
            if let (Some(key), Some(md5)) = (&self.sse_customer_key, &self.sse_customer_key_md5) {
                headers.set("x-amz-server-side-encryption-customer-algorithm", "AES256");
                headers.set("x-amz-server-side-encryption-customer-key", key);
                headers.set("x-amz-server-side-encryption-customer-key-md5", md5);
            }
        }
        if opts.tag {
            if let Some(tag) = &self.tag {
                headers.set("x-amz-tagging", tag);
            }
        }

        let payload_hash = sha256_hex(content.as_deref().unwrap_or(&[]));
        let date_time = Self::amz_date_now();

        {
            let mut signing_key = self.signing_key.lock().await;
            sign(
                &mut headers,
                &mut signing_key,
                SignRequest {
                    verb,
                    path: &encoded_path,
                    query: &query,
                    date_time: &date_time,
                    region: &self.region,
                    access_key: &credentials.access_key,
                    secret_access_key: &credentials.secret_access_key,
                    payload_hash: &payload_hash,
                },
            )?;
        }

        let request = HttpRequest {
            verb,
            host: self.bucket_endpoint.clone(),
            path: signed_path,
            query,
            headers,
            body: match content {
                Some(c) => HttpBody::Buffer(c.into()),
                None => HttpBody::Empty,
            },
        };

        let response = self.http.send(request).await?;
        let status = response.status;
        let headers = response.headers.clone();
        let body = response.into_body_bytes(1 << 20).await?;

        if !status.is_success() && !(allow_missing && status == hyper::StatusCode::NOT_FOUND) {
            let snippet_len = body.len().min(512);
            bail!(
                "s3 {} {} returned {}: {}",
                verb_str(verb),
                path,
                status,
                String::from_utf8_lossy(&body[..snippet_len])
            );
        }

        Ok((status, headers, body.to_vec()))
    }

    async fn list_internal(&self, path: &str, level: InfoLevel, opts: &ListOptions, sink: &mut ListSink<'_>) -> Result<()> {
        let base_prefix = if path == "/" { String::new() } else { format!("{}/", path.trim_start_matches('/')) };
        let mut query = HttpQuery::new();
        if !opts.recursive {
            query.add("delimiter", "/").unwrap();
        }
        let versioned = opts.target_time.is_some();
        if versioned {
            query.add("versions", "").unwrap();
        } else {
            query.add("list-type", "2").unwrap();
        }
        if !base_prefix.is_empty() {
            query.add("prefix", base_prefix.clone()).unwrap();
        }

        let mut last: Option<StorageInfo> = None;

        loop {
            let (_, _, body) = self.request(Verb::Get, "/", query.clone(), None, false, WriteOptions::default(), false).await?;
            let root = xml::parse(&body)?;

            let truncated = root.child_text("IsTruncated").as_deref() == Some("true");
            if truncated {
                let token = root.child_text("NextContinuationToken").context("NextContinuationToken missing")?;
                if token.is_empty() {
                    bail!("NextContinuationToken may not be empty");
                }
                query.put("continuation-token", token);
            }

            for common_prefix in root.children_named("CommonPrefixes") {
                let prefix = common_prefix.child_text("Prefix").context("Prefix missing")?;
                let name = prefix[base_prefix.len()..prefix.len().saturating_sub(1)].to_string();
                sink(StorageInfo {
                    exists: true,
                    name,
                    entry_type: Some(EntryType::Path),
                    size: None,
                    time_modified: None,
                    version_id: None,
                });
            }

            let entries: Vec<(&xml::Node, bool)> = if versioned {
                root.children_named("Version")
                    .map(|n| (n, false))
                    .chain(root.children_named("DeleteMarker").map(|n| (n, true)))
                    .collect()
            } else {
                root.children_named("Contents").map(|n| (n, false)).collect()
            };

            for (entry, is_delete_marker) in entries {
                let key = entry.child_text("Key").context("Key missing")?;
                let name = if base_prefix.is_empty() { key } else { key[base_prefix.len()..].to_string() };

                if let Some(prev) = &last {
                    if prev.name != name {
                        sink_last(sink, &mut last);
                    }
                }

                if versioned {
                    let last_modified = entry.child_text("LastModified").context("LastModified missing")?;
                    let modified = credentials::parse_aws_time(&last_modified)?;
                    if modified > opts.target_time.unwrap() {
                        continue;
                    }
                    if last.as_ref().map(|l| l.name == name).unwrap_or(false) {
                        continue;
                    }
                    if is_delete_marker {
                        last = Some(StorageInfo::missing(name));
                        continue;
                    }
                    let version_id = entry.child_text("VersionId").context("VersionId missing")?;
                    let size: u64 = entry.child_text("Size").unwrap_or_default().parse().unwrap_or(0);
                    last = Some(StorageInfo {
                        exists: true,
                        name,
                        entry_type: Some(EntryType::File),
                        size: if level >= InfoLevel::Basic { Some(size) } else { None },
                        time_modified: Some(modified),
                        version_id: if level >= InfoLevel::Basic { Some(version_id) } else { None },
                    });
                } else {
                    let size: u64 = entry.child_text("Size").unwrap_or_default().parse().unwrap_or(0);
                    let last_modified = entry.child_text("LastModified").context("LastModified missing")?;
                    last = Some(StorageInfo {
                        exists: true,
                        name,
                        entry_type: Some(EntryType::File),
                        size: if level >= InfoLevel::Basic { Some(size) } else { None },
                        time_modified: if level >= InfoLevel::Basic { Some(credentials::parse_aws_time(&last_modified)?) } else { None },
                        version_id: None,
                    });
                }
            }

            if !truncated {
                break;
            }
        }

        sink_last(sink, &mut last);
        Ok(())
    }
}

fn sink_last(sink: &mut ListSink<'_>, last: &mut Option<StorageInfo>) {
    if let Some(info) = last.take() {
        if info.exists {
            sink(info);
        }
    }
}

fn verb_str(v: Verb) -> &'static str {
    match v {
        Verb::Get => "GET",
        Verb::Put => "PUT",
        Verb::Post => "POST",
        Verb::Delete => "DELETE",
        Verb::Head => "HEAD",
    }
}

/// Parse an RFC 1123 HTTP-date (`"Tue, 15 Nov 1994 08:12:31 GMT"`), the only
/// format S3's `Last-Modified` response header uses.
fn parse_http_date(s: &str) -> Result<SystemTime> {
    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() != 6 {
        bail!("unrecognized http-date format: {}", s);
    }
    let day: i64 = parts[1].parse().context("day")?;
    let month = month_index(parts[2]).with_context(|| format!("unknown month: {}", parts[2]))?;
    let year: i64 = parts[3].parse().context("year")?;
    let mut time_parts = parts[4].split(':');
    let hour: i64 = time_parts.next().context("hour missing")?.parse().context("hour")?;
    let minute: i64 = time_parts.next().context("minute missing")?.parse().context("minute")?;
    let second: i64 = time_parts.next().context("second missing")?.parse().context("second")?;

    let days = credentials::days_from_civil(year, month, day);
    let secs = days * 86400 + hour * 3600 + minute * 60 + second;
    Ok(SystemTime::UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64))
}

fn month_index(name: &str) -> Option<i64> {
    const NAMES: [&str; 12] = ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];
    NAMES.iter().position(|m| *m == name).map(|i| i as i64 + 1)
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[async_trait]
impl Storage for S3Storage {
    fn features(&self) -> FeatureBits {
        FeatureBits::VERSIONING
    }

    async fn info(&self, path: &str, level: InfoLevel) -> Result<StorageInfo> {
        let opts = WriteOptions { sse_c: true, ..Default::default() };
        let (status, headers, _) = self
            .inner
            .request(Verb::Head, path, HttpQuery::new(), None, false, opts, true)
            .await?;

        let exists = status.is_success();
        if !exists || level < InfoLevel::Basic {
            return Ok(StorageInfo {
                exists,
                name: path.to_string(),
                entry_type: if exists { Some(EntryType::File) } else { None },
                size: None,
                time_modified: None,
                version_id: None,
            });
        }

        let content_length: u64 = headers.get("content-length").context("content length missing")?.parse()?;
        let last_modified = headers.get("last-modified").context("last modified missing")?;
        let time_modified = parse_http_date(last_modified).context("parsing last-modified header")?;

        Ok(StorageInfo {
            exists: true,
            name: path.to_string(),
            entry_type: Some(EntryType::File),
            size: Some(content_length),
            time_modified: Some(time_modified),
            version_id: None,
        })
    }

    async fn list(&self, path: &str, opts: ListOptions, sink: &mut ListSink<'_>) -> Result<()> {
        let level = opts.level.unwrap_or(InfoLevel::Basic);
        self.inner.list_internal(path, level, &opts, sink).await
    }

    async fn new_read(&self, path: &str, offset: u64, limit: Option<u64>, _version_id: Option<&str>) -> Result<BoxedRead> {
        let mut headers_range = String::from("bytes=");
        headers_range.push_str(&offset.to_string());
        headers_range.push('-');
        if let Some(limit) = limit {
            headers_range.push_str(&(offset + limit - 1).to_string());
        }

        let credentials = self.inner.ensure_credentials().await?;
        let signed_path = self.inner.request_path(path);
        // Same path, same encoding as `HttpRequest::uri_string` uses on the wire.
        let encoded_path = uri_encode(&signed_path, EncodeMode::Path);

        let mut headers = HttpHeaders::new();
        headers.set("host", &self.inner.bucket_endpoint);
        headers.set("content-length", "0");
        headers.set("range", &headers_range);
        if let Some(token) = &credentials.security_token {
            headers.set("x-amz-security-token", token);
        }

        let payload_hash = sha256_hex(b"");
        let date_time = Inner::amz_date_now();
        {
            let mut signing_key = self.inner.signing_key.lock().await;
            sign(
                &mut headers,
                &mut signing_key,
                SignRequest {
                    verb: Verb::Get,
                    path: &encoded_path,
                    query: &HttpQuery::new(),
                    date_time: &date_time,
                    region: &self.inner.region,
                    access_key: &credentials.access_key,
                    secret_access_key: &credentials.secret_access_key,
                    payload_hash: &payload_hash,
                },
            )?;
        }

        let request = HttpRequest {
            verb: Verb::Get,
            host: self.inner.bucket_endpoint.clone(),
            path: signed_path,
            query: HttpQuery::new(),
            headers,
            body: HttpBody::Empty,
        };
        let response = self.inner.http.send(request).await?;
        if !response.status.is_success() {
            bail!("s3 GET {} returned {}", path, response.status);
        }

        let stream = response
            .into_body_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(stream)) as BoxedRead)
    }

    async fn new_write(&self, path: &str, opts: WriteOptions) -> Result<BoxedWrite> {
        Ok(Box::new(S3Write {
            inner: self.inner.clone(),
            path: path.to_string(),
            opts,
            buf: Vec::new(),
            commit: None,
        }) as BoxedWrite)
    }

    async fn remove(&self, path: &str, error_on_missing: bool) -> Result<()> {
        self.inner
            .request(Verb::Delete, path, HttpQuery::new(), None, false, WriteOptions::default(), !error_on_missing)
            .await?;
        Ok(())
    }

    async fn path_remove(&self, path: &str, _recursive: bool) -> Result<bool> {
        // S3 has no real directory hierarchy, so every key under the prefix
        // is a deletion candidate regardless of `_recursive` (mirrors
        // `storageS3PathRemove`, which always lists the full prefix).
        let prefix = if path == "/" { String::new() } else { format!("{}/", path.trim_start_matches('/')) };

        let mut collected_keys: Vec<String> = Vec::new();

        {
            let inner = &self.inner;
            let opts = ListOptions { recursive: true, ..Default::default() };
            let mut sink = |info: StorageInfo| {
                if info.entry_type == Some(EntryType::File) {
                    collected_keys.push(format!("{}{}", prefix, info.name));
                }
            };
            inner.list_internal(path, InfoLevel::Type, &opts, &mut sink).await?;
        }

        for chunk in collected_keys.chunks(DELETE_MAX) {
            let mut batch = xml::DeleteBatchBuilder::new();
            for key in chunk {
                batch.push(format!("/{}", key));
            }
            let body = batch.into_xml();
            let mut query = HttpQuery::new();
            query.add("delete", "").unwrap();
            let (_, _, response_body) = self
                .inner
                .request(Verb::Post, "/", query, Some(body), true, WriteOptions::default(), false)
                .await?;

            for error_key in xml::delete_response_error_keys(&response_body)? {
                self.inner
                    .request(Verb::Delete, &format!("/{}", error_key), HttpQuery::new(), None, false, WriteOptions::default(), false)
                    .await?;
            }
        }

        Ok(true)
    }
}

struct S3Write {
    inner: Arc<Inner>,
    path: String,
    opts: WriteOptions,
    buf: Vec<u8>,
    commit: Option<Pin<Box<dyn Future<Output = Result<()>> + Send>>>,
}

impl Inner {
    async fn commit_write(self: Arc<Self>, path: String, data: Vec<u8>, opts: WriteOptions) -> Result<()> {
        if (data.len() as u64) < self.part_size {
            self.request(Verb::Put, &path, HttpQuery::new(), Some(data), false, opts, false).await?;
            return Ok(());
        }

        let mut query = HttpQuery::new();
        query.add("uploads", "").unwrap();
        let (_, _, init_body) = self.request(Verb::Post, &path, query, None, false, opts.clone(), false).await?;
        let init_doc = xml::parse(&init_body)?;
        let upload_id = init_doc.child_text("UploadId").context("UploadId missing from multipart init response")?;

        let mut parts_xml = String::from("<CompleteMultipartUpload>");
        for (idx, part) in data.chunks(self.part_size as usize).enumerate() {
            let part_number = idx + 1;
            let mut part_query = HttpQuery::new();
            part_query.add("partNumber", part_number.to_string()).unwrap();
            part_query.add("uploadId", upload_id.clone()).unwrap();
            let (_, part_headers, _) = self
                .request(Verb::Put, &path, part_query, Some(part.to_vec()), false, WriteOptions::default(), false)
                .await?;
            let etag = part_headers.get("etag").context("ETag missing from part upload response")?;
            parts_xml.push_str(&format!("<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>", part_number, etag));
        }
        parts_xml.push_str("</CompleteMultipartUpload>");

        let mut complete_query = HttpQuery::new();
        complete_query.add("uploadId", upload_id).unwrap();
        self.request(Verb::Post, &path, complete_query, Some(parts_xml.into_bytes()), false, WriteOptions::default(), false)
            .await?;

        Ok(())
    }
}

impl AsyncWrite for S3Write {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.commit.is_none() {
            let inner = this.inner.clone();
            let path = this.path.clone();
            let opts = this.opts.clone();
            let data = std::mem::take(&mut this.buf);
            this.commit = Some(Box::pin(async move { inner.commit_write(path, data, opts).await }));
        }
        let fut = this.commit.as_mut().expect("set above");
        match fut.as_mut().poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_from_days_matches_known_epoch_offset() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(18262), (2020, 1, 1));
    }

    #[test]
    fn path_style_request_path_prepends_bucket() {
        let inner = Inner {
            http: HttpClient::new(Duration::from_secs(5)).unwrap(),
            cred_http: HttpClient::new(Duration::from_secs(5)).unwrap(),
            bucket: "mybucket".into(),
            region: "us-east-1".into(),
            uri_style: UriStyle::Path,
            bucket_endpoint: "s3.amazonaws.com".into(),
            credential_source: Mutex::new(CredentialSourceState::Shared),
            credentials: Mutex::new(None),
            signing_key: Mutex::new(SigningKeyCache::new()),
            part_size: DEFAULT_PART_SIZE,
            kms_key_id: None,
            sse_customer_key: None,
            sse_customer_key_md5: None,
            tag: None,
            requester_pays: false,
        };
        assert_eq!(inner.request_path("/a/b"), "/mybucket/a/b");
    }

    #[test]
    fn host_style_request_path_is_unmodified() {
        let inner = Inner {
            http: HttpClient::new(Duration::from_secs(5)).unwrap(),
            cred_http: HttpClient::new(Duration::from_secs(5)).unwrap(),
            bucket: "mybucket".into(),
            region: "us-east-1".into(),
            uri_style: UriStyle::Host,
            bucket_endpoint: "mybucket.s3.amazonaws.com".into(),
            credential_source: Mutex::new(CredentialSourceState::Shared),
            credentials: Mutex::new(None),
            signing_key: Mutex::new(SigningKeyCache::new()),
            part_size: DEFAULT_PART_SIZE,
            kms_key_id: None,
            sse_customer_key: None,
            sse_customer_key_md5: None,
            tag: None,
            requester_pays: false,
        };
        assert_eq!(inner.request_path("/a/b"), "/a/b");
    }
}
