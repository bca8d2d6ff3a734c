//! AWS Signature Version 4 request signing.
//!
//! Builds the canonical request, string-to-sign, and chained-HMAC daily
//! signing key using `openssl`'s HMAC/SHA-256 (already a dependency via
//! TLS) instead of a bespoke crypto module.

use anyhow::Result;
use openssl::hash::MessageDigest;
use openssl::sha;
use openssl::sign::Signer;

use crate::http::{HttpHeaders, HttpQuery, Verb};

const AWS4_HMAC_SHA256: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const AWS4_REQUEST: &str = "aws4_request";

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha::sha256(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let pkey = openssl::pkey::PKey::hmac(key).expect("valid hmac key");
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey).expect("hmac signer");
    signer.update(data).expect("hmac update");
    signer.sign_to_vec().expect("hmac sign")
}

/// Caches the daily signing key; `None` forces regeneration. No
/// `"YYYYMMDD"` sentinel string is stored separately; the date is
/// derived fresh from each request's timestamp and compared directly.
#[derive(Default)]
pub struct SigningKeyCache {
    date: Option<String>,
    key: Vec<u8>,
}

impl SigningKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the next call to [`Self::key_for_date`] to regenerate,
    /// regardless of date (used after a credential refresh).
    pub fn invalidate(&mut self) {
        self.date = None;
    }

    fn key_for_date(&mut self, date: &str, secret_access_key: &str, region: &str) -> &[u8] {
        if self.date.as_deref() != Some(date) {
            let date_key = hmac_sha256(format!("AWS4{}", secret_access_key).as_bytes(), date.as_bytes());
            let region_key = hmac_sha256(&date_key, region.as_bytes());
            let service_key = hmac_sha256(&region_key, SERVICE.as_bytes());
            self.key = hmac_sha256(&service_key, AWS4_REQUEST.as_bytes());
            self.date = Some(date.to_string());
        }
        &self.key
    }
}

pub struct SignRequest<'a> {
    pub verb: Verb,
    pub path: &'a str,
    pub query: &'a HttpQuery,
    pub date_time: &'a str,
    pub region: &'a str,
    pub access_key: &'a str,
    pub secret_access_key: &'a str,
    pub payload_hash: &'a str,
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

/// Adds `x-amz-content-sha256`, `x-amz-date`, `authorization` (and whatever
/// the caller already set, e.g. `host`, `x-amz-security-token`) to
/// `headers`, mutating the header map in place rather than returning a
/// new one.
pub fn sign(headers: &mut HttpHeaders, cache: &mut SigningKeyCache, req: SignRequest<'_>) -> Result<()> {
    let date = &req.date_time[0..8];

    headers.set("x-amz-content-sha256", req.payload_hash);
    headers.set("x-amz-date", req.date_time);

    let mut signed_header_names = Vec::new();
    let mut canonical_headers = String::new();
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(value);
        canonical_headers.push('\n');
        signed_header_names.push(name.to_string());
    }
    let signed_headers = signed_header_names.join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        verb_str(req.verb),
        req.path,
        req.query.render(),
        canonical_headers,
        signed_headers,
        req.payload_hash
    );

    let string_to_sign = format!(
        "{}\n{}\n{}/{}/{}/{}\n{}",
        AWS4_HMAC_SHA256,
        req.date_time,
        date,
        req.region,
        SERVICE,
        AWS4_REQUEST,
        sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = cache.key_for_date(date, req.secret_access_key, req.region).to_vec();
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{} Credential={}/{}/{}/{}/{},SignedHeaders={},Signature={}",
        AWS4_HMAC_SHA256, req.access_key, date, req.region, SERVICE, AWS4_REQUEST, signed_headers, signature
    );
    headers.set("authorization", authorization);

    Ok(())
}
