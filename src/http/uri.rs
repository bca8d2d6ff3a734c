//! URI percent-encoding and query rendering.
//!
//! Two encode modes: `path` leaves `/` alone (for building request paths
//! out of already-segmented components, and for S3's canonical-request
//! path line, which must be encoded the same way the path is transmitted),
//! `strict` percent-encodes every reserved character including `/` (for
//! query values).

use percent_encoding::{AsciiSet, CONTROLS};
use std::collections::BTreeMap;

use thiserror::Error;

/// Characters that are never percent-encoded in either mode: unreserved
/// per RFC 3986 (`A-Z a-z 0-9 - _ . ~`).
const UNRESERVED: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'!')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'=')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b']');

/// Same as [`UNRESERVED`] but additionally leaves `/` unencoded, for
/// `path`-mode encoding.
const UNRESERVED_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'!')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b':')
    .add(b';')
    .add(b'=')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b']');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// All reserved characters encoded except `/`.
    Path,
    /// All reserved characters encoded, including `/`.
    Strict,
}

pub fn uri_encode(input: &str, mode: EncodeMode) -> String {
    uri_encode_bytes(input.as_bytes(), mode)
}

/// Byte-level encode: every reserved byte (per `mode`) becomes `%XX`,
/// including bytes that are not valid UTF-8 on their own. This is what
/// makes "encode then decode is identity for every byte value" hold.
pub fn uri_encode_bytes(input: &[u8], mode: EncodeMode) -> String {
    let set = match mode {
        EncodeMode::Path => UNRESERVED_PATH,
        EncodeMode::Strict => UNRESERVED,
    };
    percent_encoding::percent_encode(input, set).to_string()
}

pub fn uri_decode(input: &str) -> Result<String, std::string::FromUtf8Error> {
    String::from_utf8(uri_decode_bytes(input))
}

pub fn uri_decode_bytes(input: &str) -> Vec<u8> {
    percent_encoding::percent_decode_str(input).collect()
}

#[derive(Error, Debug)]
#[error("query key '{0}' already exists")]
pub struct DuplicateKeyError(pub String);

/// Ordered (by key) string-to-string mapping used for request query
/// strings. `add` rejects a duplicate key; `put` overwrites explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpQuery {
    inner: BTreeMap<String, String>,
}

impl HttpQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), DuplicateKeyError> {
        let key = key.into();
        if self.inner.contains_key(&key) {
            return Err(DuplicateKeyError(key));
        }
        self.inner.insert(key, value.into());
        Ok(())
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Render as `k=v&k=v...`, keys sorted ascending (the `BTreeMap`
    /// already keeps them sorted), values strict-encoded.
    pub fn render(&self) -> String {
        self.inner
            .iter()
            .map(|(k, v)| format!("{}={}", k, uri_encode(v, EncodeMode::Strict)))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_encode_decode_roundtrip_all_bytes() {
        // Every byte value, including ones that aren't valid standalone
        // UTF-8, must survive encode(strict) -> decode as identity.
        for b in 0u16..=255 {
            let byte = [b as u8];
            let encoded = uri_encode_bytes(&byte, EncodeMode::Strict);
            let decoded = uri_decode_bytes(&encoded);
            assert_eq!(decoded, byte, "byte {} did not round-trip", b);
        }
    }

    #[test]
    fn path_mode_leaves_slash_untouched() {
        let encoded = uri_encode("/a/b c/d", EncodeMode::Path);
        assert_eq!(encoded, "/a/b%20c/d");
    }

    #[test]
    fn strict_mode_encodes_slash() {
        let encoded = uri_encode("/a/b", EncodeMode::Strict);
        assert_eq!(encoded, "%2Fa%2Fb");
    }

    #[test]
    fn query_add_rejects_duplicate() {
        let mut q = HttpQuery::new();
        q.add("a", "1").unwrap();
        assert!(q.add("a", "2").is_err());
        q.put("a", "2");
        assert_eq!(q.get("a"), Some("2"));
    }

    #[test]
    fn query_renders_sorted_by_key() {
        let mut q = HttpQuery::new();
        q.add("zeta", "1").unwrap();
        q.add("alpha", "v a").unwrap();
        assert_eq!(q.render(), "alpha=v%20a&zeta=1");
    }
}
