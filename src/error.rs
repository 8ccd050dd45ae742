//! NNTP error types
//!
//! Low-level transport and protocol failures are translated into this enum at the
//! connection layer. Pooling, retry and failover layers only look at the
//! classification helpers below, never at raw transport errors.

use thiserror::Error;

/// NNTP protocol, connection and stream errors
#[derive(Error, Debug)]
pub enum NntpError {
    /// IO error during network or cache operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not establish the TCP session
    #[error("Connect failed: {0}")]
    Connect(String),

    /// TLS error during secure connection
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection timeout
    #[error("Connection timeout")]
    Timeout,

    /// Invalid response from server (malformed status line, bad yEnc data)
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// NNTP protocol error with response code
    #[error("NNTP error {code}: {message}")]
    Protocol {
        /// NNTP response code (e.g., 411, 502)
        code: u16,
        /// Error message from server
        message: String,
    },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// No such article on this provider
    #[error("No such article: {0}")]
    NoSuchArticle(String),

    /// Connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Segment metadata is inconsistent (gaps, overlaps, wrong totals)
    #[error("Corrupt segment metadata: {0}")]
    CorruptMetadata(String),

    /// AES ciphertext is not a whole number of blocks
    #[error("Ciphertext length {0} is not a multiple of the AES block size")]
    InvalidCiphertextLength(u64),

    /// Client graph was built without any usable provider
    #[error("No usenet providers configured")]
    NoProvidersConfigured,

    /// The pool or gate has been shut down
    #[error("Connection pool shut down")]
    PoolShutdown,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl NntpError {
    /// The segment does not exist on the provider that answered
    pub fn is_article_not_found(&self) -> bool {
        matches!(self, NntpError::NoSuchArticle(_))
    }

    /// The caller cancelled; never retried, never wrapped
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NntpError::Cancelled)
    }

    /// Upstream metadata is broken; retrying the same download cannot help
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            NntpError::CorruptMetadata(_) | NntpError::InvalidCiphertextLength(_)
        )
    }

    /// Whether a fresh connection (or another provider) might succeed
    ///
    /// Connect, auth, protocol, decode and transport failures are retryable.
    /// Missing articles, cancellation, integrity errors and configuration
    /// errors are not.
    pub fn is_retryable(&self) -> bool {
        !(self.is_article_not_found()
            || self.is_cancelled()
            || self.is_integrity_error()
            || matches!(
                self,
                NntpError::NoProvidersConfigured | NntpError::PoolShutdown
            ))
    }
}

/// Result type alias using NntpError
pub type Result<T> = std::result::Result<T, NntpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_not_retryable() {
        let err = NntpError::NoSuchArticle("<a@b>".to_string());
        assert!(err.is_article_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(NntpError::ConnectionClosed.is_retryable());
        assert!(NntpError::Timeout.is_retryable());
        assert!(NntpError::AuthFailed("bad".into()).is_retryable());
        assert!(NntpError::InvalidResponse("garbage".into()).is_retryable());
        assert!(
            NntpError::Protocol {
                code: 502,
                message: "busy".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_cancellation_is_distinct() {
        let err = NntpError::Cancelled;
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());
        assert!(!err.is_integrity_error());
    }

    #[test]
    fn test_integrity_errors() {
        assert!(NntpError::CorruptMetadata("gap".into()).is_integrity_error());
        assert!(NntpError::InvalidCiphertextLength(17).is_integrity_error());
        assert!(!NntpError::InvalidCiphertextLength(17).is_retryable());
    }
}
