//! Error taxonomy for the backup engine.
//!
//! Most call sites propagate `anyhow::Error`; [`EngineError`] exists for
//! the handful of kinds that callers need to pattern-match on
//! (allow-missing handling, retry classification, user-facing
//! formatting).

use thiserror::Error;

/// Error kinds a caller may need to distinguish. The payload carries
/// whatever context is cheap to keep around.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("assertion failed: {0}")]
    Assert(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("file missing: {0}")]
    FileMissing(String),

    #[error("path missing: {0}")]
    PathMissing(String),

    #[error("unable to open file '{path}': {source}")]
    FileOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to read file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to write file '{path}': {source}")]
    FileWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to remove file '{path}': {source}")]
    FileRemove {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("link destination error: {0}")]
    LinkDestination(String),

    #[error("link expected: {0}")]
    LinkExpected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("access error: {0}")]
    Access(String),

    #[error("invalid option value: {0}")]
    OptionInvalidValue(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

impl EngineError {
    /// True for the two kinds that a caller passing `allow_missing` may
    /// recover from as "does not exist".
    pub fn is_missing(&self) -> bool {
        matches!(self, EngineError::FileMissing(_) | EngineError::PathMissing(_))
    }
}

/// Format a user-visible top-level failure as `raised from <peer>: <msg>`.
pub fn raised_from(peer: &str, err: &anyhow::Error) -> String {
    format!("raised from {}: {}", peer, err)
}

/// Format a retried-error message: attempt count appears, intermediate
/// messages are collapsed to the `[RETRY DETAIL OMITTED]` marker.
pub fn retry_exhausted_message(attempts: usize, final_error: &anyhow::Error) -> String {
    if attempts <= 1 {
        return final_error.to_string();
    }
    format!(
        "{} [RETRY DETAIL OMITTED] (retried {} times)",
        final_error, attempts
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_kinds_are_recoverable() {
        assert!(EngineError::FileMissing("x".into()).is_missing());
        assert!(EngineError::PathMissing("x".into()).is_missing());
        assert!(!EngineError::Protocol("x".into()).is_missing());
    }

    #[test]
    fn retry_message_includes_attempt_count() {
        let err = anyhow::anyhow!("boom");
        let msg = retry_exhausted_message(3, &err);
        assert!(msg.contains("RETRY DETAIL OMITTED"));
        assert!(msg.contains('3'));
    }

    #[test]
    fn single_attempt_has_no_retry_marker() {
        let err = anyhow::anyhow!("boom");
        let msg = retry_exhausted_message(1, &err);
        assert_eq!(msg, "boom");
    }
}
