//! NNTP command builders and response parsers
//!
//! Only the commands the streaming client issues live here: AUTHINFO and
//! QUIT for the session, STAT/HEAD/BODY/ARTICLE for retrieval, and DATE as
//! a cheap liveness probe.

pub mod article;
pub mod response;

pub use article::*;
pub use response::*;

/// `AUTHINFO USER` (RFC 4643 §2.3)
pub fn authinfo_user(username: &str) -> String {
    format!("AUTHINFO USER {}\r\n", username)
}

/// `AUTHINFO PASS`, sent after a 381 reply
pub fn authinfo_pass(password: &str) -> String {
    format!("AUTHINFO PASS {}\r\n", password)
}

pub fn quit() -> &'static str {
    "QUIT\r\n"
}

/// `DATE` (RFC 3977 §7.1); the server answers `111 yyyymmddhhmmss`
pub fn date() -> &'static str {
    "DATE\r\n"
}
