//! Status line and DATE parsing

use crate::error::{NntpError, Result};
use crate::response::{NntpResponse, codes};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Split a status line into code and text
///
/// Tolerates a leading BOM and a missing space after the code; rejects
/// anything whose first token is not exactly three digits.
pub fn parse_response_line(line: &str) -> Result<(u16, String)> {
    let line = line.trim_start_matches('\u{FEFF}');
    let invalid = || NntpError::InvalidResponse(line.chars().take(100).collect());

    let (digits, rest) = line.split_at_checked(3).ok_or_else(invalid)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) || rest.starts_with(|c: char| c.is_ascii_digit())
    {
        return Err(invalid());
    }
    let code = digits.parse().map_err(|_| invalid())?;
    Ok((code, rest.strip_prefix(' ').unwrap_or(rest).to_string()))
}

/// Parse a single-line reply
pub fn parse_single_response(line: &str) -> Result<NntpResponse> {
    let (code, message) = parse_response_line(line)?;
    Ok(NntpResponse {
        code,
        message,
        lines: Vec::new(),
    })
}

/// Parse DATE response (RFC 3977 §7.1)
///
/// Response format: "111 yyyymmddhhmmss" (UTC)
pub fn parse_date_response(response: NntpResponse) -> Result<DateTime<Utc>> {
    if response.code != codes::SERVER_DATE {
        return Err(NntpError::Protocol {
            code: response.code,
            message: response.message,
        });
    }

    let stamp = response.message.split_whitespace().next().unwrap_or_default();
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| NntpError::InvalidResponse(response.message.clone()))
}
