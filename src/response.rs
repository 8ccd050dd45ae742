//! NNTP replies and the status codes the streaming client acts on
//!
//! Every reply starts with a three digit status. Its first digit is all the
//! pool and retry layers care about; [`NntpResponse::into_result`] turns the
//! rest into the crate error taxonomy.

use crate::error::{NntpError, Result};

/// First digit of a status code (RFC 3977 §3.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 1xx: informative message (DATE)
    Informative,
    /// 2xx: command completed
    Completed,
    /// 3xx: send the rest of the command (AUTHINFO PASS)
    Continue,
    /// 4xx: correct command that could not be carried out
    Failed,
    /// 5xx: command unknown, unsupported or not permitted
    Rejected,
}

impl StatusClass {
    /// Class of `code`; anything outside 100..600 counts as rejected
    pub fn of(code: u16) -> Self {
        match code / 100 {
            1 => StatusClass::Informative,
            2 => StatusClass::Completed,
            3 => StatusClass::Continue,
            4 => StatusClass::Failed,
            _ => StatusClass::Rejected,
        }
    }
}

/// Status line plus the text lines of a multi-line block (HEAD)
#[derive(Debug, Clone)]
pub struct NntpResponse {
    /// Status code
    pub code: u16,
    /// Text after the code
    pub message: String,
    /// Block lines, dot-unstuffed; empty for single-line replies
    pub lines: Vec<String>,
}

impl NntpResponse {
    /// Class of the status code
    pub fn class(&self) -> StatusClass {
        StatusClass::of(self.code)
    }

    /// 1xx or 2xx
    pub fn is_success(&self) -> bool {
        matches!(
            self.class(),
            StatusClass::Informative | StatusClass::Completed
        )
    }

    /// The reply itself, or the error it stands for
    ///
    /// 430/423 become [`NntpError::NoSuchArticle`] for `segment_id`; other
    /// failures become [`NntpError::Protocol`].
    pub fn into_result(self, segment_id: &str) -> Result<Self> {
        check_status(self.code, &self.message, segment_id)?;
        Ok(self)
    }
}

/// Status line plus the raw payload of BODY or ARTICLE
///
/// Lines are dot-unstuffed and joined with CRLF so the yEnc decoder sees the
/// posted line structure without any UTF-8 round trip.
#[derive(Debug, Clone)]
pub struct NntpBinaryResponse {
    /// Status code
    pub code: u16,
    /// Text after the code
    pub message: String,
    /// Payload; empty for error replies
    pub data: Vec<u8>,
}

impl NntpBinaryResponse {
    /// The payload, or the error the status stands for
    pub fn into_data(self, segment_id: &str) -> Result<Vec<u8>> {
        check_status(self.code, &self.message, segment_id)?;
        Ok(self.data)
    }
}

fn check_status(code: u16, message: &str, segment_id: &str) -> Result<()> {
    if codes::is_missing_article(code) {
        return Err(NntpError::NoSuchArticle(segment_id.to_string()));
    }
    match StatusClass::of(code) {
        StatusClass::Informative | StatusClass::Completed => Ok(()),
        _ => Err(NntpError::Protocol {
            code,
            message: message.to_string(),
        }),
    }
}

/// Status codes the streaming client acts on (RFC 3977, RFC 4643)
pub mod codes {
    /// Server date/time (RFC 3977 Section 7.1)
    pub const SERVER_DATE: u16 = 111;
    /// Article exists (STAT)
    pub const ARTICLE_STAT: u16 = 223;
    /// Authentication accepted
    pub const AUTH_ACCEPTED: u16 = 281;
    /// Continue with authentication
    pub const AUTH_CONTINUE: u16 = 381;
    /// No article with that number
    pub const NO_SUCH_ARTICLE_NUMBER: u16 = 423;
    /// No article with that message-id
    pub const NO_SUCH_ARTICLE_ID: u16 = 430;
    /// Access denied / command unavailable
    pub const ACCESS_DENIED: u16 = 502;

    /// Whether `code` means the requested article does not exist
    pub fn is_missing_article(code: u16) -> bool {
        code == NO_SUCH_ARTICLE_ID || code == NO_SUCH_ARTICLE_NUMBER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(code: u16) -> NntpResponse {
        NntpResponse {
            code,
            message: "text".to_string(),
            lines: vec![],
        }
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(StatusClass::of(111), StatusClass::Informative);
        assert_eq!(StatusClass::of(222), StatusClass::Completed);
        assert_eq!(StatusClass::of(381), StatusClass::Continue);
        assert_eq!(StatusClass::of(430), StatusClass::Failed);
        assert_eq!(StatusClass::of(502), StatusClass::Rejected);
        assert_eq!(StatusClass::of(999), StatusClass::Rejected);

        assert!(reply(111).is_success());
        assert!(reply(200).is_success());
        assert!(!reply(381).is_success());
    }

    #[test]
    fn test_missing_article_maps_to_not_found() {
        let err = reply(430).into_result("a@b").unwrap_err();
        assert!(matches!(err, NntpError::NoSuchArticle(ref id) if id == "a@b"));

        let binary = NntpBinaryResponse {
            code: 423,
            message: "no such article number".to_string(),
            data: Vec::new(),
        };
        assert!(binary.into_data("a@b").unwrap_err().is_article_not_found());
    }

    #[test]
    fn test_other_failures_are_protocol_errors() {
        let err = reply(400).into_result("a@b").unwrap_err();
        assert!(matches!(err, NntpError::Protocol { code: 400, .. }));
        assert!(err.is_retryable());

        let ok = NntpBinaryResponse {
            code: 222,
            message: "body".to_string(),
            data: b"payload".to_vec(),
        };
        assert_eq!(ok.into_data("a@b").unwrap(), b"payload");
    }

    #[test]
    fn test_missing_article_codes() {
        assert!(codes::is_missing_article(430));
        assert!(codes::is_missing_article(423));
        assert!(!codes::is_missing_article(411));
    }
}
