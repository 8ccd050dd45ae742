//! `=ybegin`, `=ypart` and `=yend` keyword lines

use super::types::{YencBegin, YencEnd, YencPart};
use crate::{NntpError, Result};
use std::str::FromStr;

/// `key=value` pairs of one keyword line, in line order
struct KeywordLine<'a> {
    keyword: &'static str,
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> KeywordLine<'a> {
    /// Split `line` after checking it starts with `keyword` and a space
    ///
    /// `name` is always the last parameter and runs to the end of the line,
    /// so file names containing spaces survive intact.
    fn parse(keyword: &'static str, line: &'a str) -> Result<Self> {
        let rest = line
            .strip_prefix(keyword)
            .filter(|rest| rest.starts_with(' '))
            .ok_or_else(|| {
                NntpError::InvalidResponse(format!(
                    "expected {} line, got: {}",
                    keyword,
                    line.chars().take(80).collect::<String>()
                ))
            })?;

        let mut pairs = Vec::new();
        let mut rest = rest.trim_start();
        while let Some((key, after)) = rest.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                break;
            }
            if key == "name" {
                pairs.push((key, after.trim_end()));
                break;
            }
            let (value, remaining) = after.split_once(' ').unwrap_or((after, ""));
            pairs.push((key, value));
            rest = remaining.trim_start();
        }
        Ok(Self { keyword, pairs })
    }

    fn raw(&self, key: &str) -> Option<&'a str> {
        self.pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    /// Decimal value of `key`, `None` when absent or malformed
    fn optional<T: FromStr>(&self, key: &str) -> Option<T> {
        self.raw(key).and_then(|v| v.parse().ok())
    }

    fn required<T: FromStr>(&self, key: &str) -> Result<T> {
        self.optional(key).ok_or_else(|| {
            NntpError::InvalidResponse(format!("{} without valid '{}'", self.keyword, key))
        })
    }

    /// Hexadecimal CRC value of `key`
    fn crc(&self, key: &str) -> Option<u32> {
        self.raw(key).and_then(|v| u32::from_str_radix(v, 16).ok())
    }
}

/// Parse `=ybegin line=128 size=123456 [part=1 total=5] name=file.bin`
pub(crate) fn parse_ybegin(line: &str) -> Result<YencBegin> {
    let line = KeywordLine::parse("=ybegin", line)?;
    Ok(YencBegin {
        line: line.required("line")?,
        size: line.required("size")?,
        name: line
            .raw("name")
            .ok_or_else(|| NntpError::InvalidResponse("=ybegin without 'name'".to_string()))?
            .to_string(),
        part: line.optional("part"),
        total: line.optional("total"),
    })
}

/// Parse `=ypart begin=1 end=384000`
pub(crate) fn parse_ypart(line: &str) -> Result<YencPart> {
    let line = KeywordLine::parse("=ypart", line)?;
    Ok(YencPart {
        begin: line.required("begin")?,
        end: line.required("end")?,
    })
}

/// Parse `=yend size=384000 [part=1] [pcrc32=...] [crc32=...]`
pub(crate) fn parse_yend(line: &str) -> Result<YencEnd> {
    let line = KeywordLine::parse("=yend", line)?;
    Ok(YencEnd {
        size: line.required("size")?,
        crc32: line.crc("crc32"),
        pcrc32: line.crc("pcrc32"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_part_begin() {
        let begin = parse_ybegin("=ybegin line=128 size=123456 name=test.bin").unwrap();
        assert_eq!(begin.line, 128);
        assert_eq!(begin.size, 123456);
        assert_eq!(begin.name, "test.bin");
        assert_eq!((begin.part, begin.total), (None, None));
    }

    #[test]
    fn test_multipart_begin_with_spaced_name() {
        let begin =
            parse_ybegin("=ybegin part=2 total=9 line=128 size=5000 name=My Movie (2020).mkv")
                .unwrap();
        assert_eq!(begin.name, "My Movie (2020).mkv");
        assert_eq!((begin.part, begin.total), (Some(2), Some(9)));
    }

    #[test]
    fn test_part_and_trailer() {
        let part = parse_ypart("=ypart begin=384001 end=768000").unwrap();
        assert_eq!((part.begin, part.end), (384001, 768000));

        let end = parse_yend("=yend size=384000 part=2 pcrc32=0badf00d").unwrap();
        assert_eq!(end.size, 384000);
        assert_eq!(end.pcrc32, Some(0x0badf00d));
        assert_eq!(end.crc32, None);
    }

    #[test]
    fn test_rejects_wrong_or_incomplete_lines() {
        assert!(parse_ybegin("=ybeginline=128 size=1 name=x").is_err());
        assert!(parse_ybegin("=ypart begin=1 end=2").is_err());
        assert!(parse_ybegin("=ybegin line=128 name=x").is_err());
        assert!(parse_ypart("=ypart begin=1").is_err());
        assert!(parse_yend("=yend crc32=00000000").is_err());
        assert!(parse_ypart("=ypart begin=x end=2").is_err());
    }
}
