//! Article retrieval commands and their response parsers

use crate::error::{NntpError, Result};
use crate::response::{NntpResponse, codes};

/// Wrap a segment id in angle brackets unless it already carries them
///
/// NZB files store message-ids without brackets; the wire protocol needs them.
pub fn message_id(segment_id: &str) -> String {
    let trimmed = segment_id.trim();
    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        trimmed.to_string()
    } else {
        format!("<{}>", trimmed)
    }
}

/// Build ARTICLE command
pub fn article(id: &str) -> String {
    format!("ARTICLE {}\r\n", id)
}

/// Build HEAD command
pub fn head(id: &str) -> String {
    format!("HEAD {}\r\n", id)
}

/// Build BODY command
pub fn body(id: &str) -> String {
    format!("BODY {}\r\n", id)
}

/// Build STAT command (RFC 3977 §6.2.4)
pub fn stat(id: &str) -> String {
    format!("STAT {}\r\n", id)
}

/// Outcome of a STAT command
///
/// A missing article is a normal answer to STAT, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleStat {
    /// The article exists
    Found {
        /// Article number (0 when queried by message-id)
        number: u64,
        /// Message identifier echoed by the server
        message_id: String,
    },
    /// 430/423: no such article
    Missing,
}

impl ArticleStat {
    /// Whether the article exists
    pub fn exists(&self) -> bool {
        matches!(self, ArticleStat::Found { .. })
    }
}

/// Parse STAT response (RFC 3977 §6.2.4)
///
/// Response format: "223 n message-id"
pub fn parse_stat_response(response: NntpResponse) -> Result<ArticleStat> {
    if codes::is_missing_article(response.code) {
        return Ok(ArticleStat::Missing);
    }

    if response.code != codes::ARTICLE_STAT {
        return Err(NntpError::Protocol {
            code: response.code,
            message: response.message,
        });
    }

    let parts: Vec<&str> = response.message.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(NntpError::InvalidResponse(response.message));
    }

    let number = parts[0]
        .parse()
        .map_err(|_| NntpError::InvalidResponse(response.message.clone()))?;

    Ok(ArticleStat::Found {
        number,
        message_id: parts[1..].join(" "),
    })
}

/// Article headers in wire order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleHeaders {
    entries: Vec<(String, String)>,
}

impl ArticleHeaders {
    /// First value of a header, case-insensitive
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All headers in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no headers were parsed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse header lines (RFC 5322 style, with folded continuation lines)
pub fn parse_headers<'a>(lines: impl IntoIterator<Item = &'a str>) -> ArticleHeaders {
    let mut entries: Vec<(String, String)> = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = entries.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            entries.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    ArticleHeaders { entries }
}

/// Split a raw ARTICLE payload into its header block and body
///
/// The payload is CRLF-joined (as produced by the binary reader); the body
/// starts after the first empty line.
pub fn split_article(data: &[u8]) -> (ArticleHeaders, &[u8]) {
    let (head, body) = match find_blank_line(data) {
        Some((head_end, body_start)) => (&data[..head_end], &data[body_start..]),
        None => (data, &data[data.len()..]),
    };
    let head = String::from_utf8_lossy(head);
    let headers = parse_headers(head.lines());
    (headers, body)
}

fn find_blank_line(data: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    data.windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos, pos + 2))
}
