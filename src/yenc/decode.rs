use crate::{NntpError, Result};
use crc32fast::Hasher;

use super::params::{parse_ybegin, parse_yend, parse_ypart};
use super::types::{YencDecoded, YencHeader};

/// Body lines without their CR/LF terminators
fn lines(input: &[u8]) -> impl Iterator<Item = &[u8]> {
    input
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

fn keyword_line<'a>(line: &'a [u8], what: &str) -> Result<&'a str> {
    std::str::from_utf8(line)
        .map_err(|_| NntpError::InvalidResponse(format!("{} line is not valid UTF-8", what)))
}

/// Consume lines up to and including `=ybegin` and an optional `=ypart`
///
/// Anything before `=ybegin` is ignored; some posters put blank lines or a
/// short note first. On return `lines` sits on the first data line.
fn read_header<'a, I>(lines: &mut std::iter::Peekable<I>) -> Result<YencHeader>
where
    I: Iterator<Item = &'a [u8]>,
{
    let begin = lines
        .find(|line| line.starts_with(b"=ybegin "))
        .ok_or_else(|| NntpError::InvalidResponse("no =ybegin line in body".to_string()))?;
    let begin = parse_ybegin(keyword_line(begin, "=ybegin")?)?;

    let part = match lines.next_if(|line| line.starts_with(b"=ypart ")) {
        Some(line) => Some(parse_ypart(keyword_line(line, "=ypart")?)?),
        None => None,
    };
    YencHeader::from_parts(&begin, part.as_ref())
}

/// Parse only the yEnc header of a body
///
/// `input` may be just the first few lines of the body.
pub fn parse_header(input: &[u8]) -> Result<YencHeader> {
    read_header(&mut lines(input).peekable())
}

/// Decode a complete yEnc body
///
/// The decoded length must match the `=yend` size. The checksum is only
/// computed here; [`YencDecoded::crc_mismatch`] compares it.
///
/// # Errors
///
/// [`NntpError::InvalidResponse`] when the header or trailer is missing or
/// malformed, or when the decoded length disagrees with the trailer.
pub fn decode(input: &[u8]) -> Result<YencDecoded> {
    let mut lines = lines(input).peekable();
    let header = read_header(&mut lines)?;

    let mut data = Vec::with_capacity(header.part_size as usize);
    let mut trailer = None;
    for line in lines {
        if line.starts_with(b"=yend ") {
            trailer = Some(parse_yend(keyword_line(line, "=yend")?)?);
            break;
        }
        unescape_into(line, &mut data)?;
    }
    let trailer =
        trailer.ok_or_else(|| NntpError::InvalidResponse("body ends without =yend".to_string()))?;

    if data.len() as u64 != trailer.size {
        return Err(NntpError::InvalidResponse(format!(
            "yEnc size mismatch: decoded {} bytes, =yend says {}",
            data.len(),
            trailer.size
        )));
    }

    let mut hasher = Hasher::new();
    hasher.update(&data);
    Ok(YencDecoded {
        header,
        trailer,
        calculated_crc32: hasher.finalize(),
        data,
    })
}

/// Append the decoded bytes of one data line
///
/// Every byte is stored shifted by 42; a byte after `=` is shifted by a
/// further 64.
fn unescape_into(line: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let mut bytes = line.iter().copied();
    while let Some(byte) = bytes.next() {
        let value = match byte {
            b'=' => bytes
                .next()
                .ok_or_else(|| {
                    NntpError::InvalidResponse("escape character at end of line".to_string())
                })?
                .wrapping_sub(64),
            b'\r' => continue,
            other => other,
        };
        out.push(value.wrapping_sub(42));
    }
    Ok(())
}
