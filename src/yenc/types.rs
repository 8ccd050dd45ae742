use crate::{NntpError, Result};

/// yEnc `=ybegin` line
#[derive(Debug, Clone, PartialEq)]
pub struct YencBegin {
    /// Line length (typically 128, max 997)
    pub line: usize,
    /// Total file size in bytes
    pub size: u64,
    /// Original filename
    pub name: String,
    /// Part number (for multi-part files)
    pub part: Option<u32>,
    /// Total number of parts (for multi-part files)
    pub total: Option<u32>,
}

/// yEnc part header from =ypart line (for multi-part files)
#[derive(Debug, Clone, PartialEq)]
pub struct YencPart {
    /// 1-based offset of the first byte of this part in the original file
    pub begin: u64,
    /// 1-based offset of the last byte of this part (inclusive)
    pub end: u64,
}

/// yEnc trailer from =yend line
#[derive(Debug, Clone, PartialEq)]
pub struct YencEnd {
    /// Size of decoded data in bytes
    pub size: u64,
    /// CRC32 of entire decoded file (for single-part) or this part (for multi-part)
    pub crc32: Option<u32>,
    /// CRC32 of this part only (for multi-part files)
    pub pcrc32: Option<u32>,
}

/// Per-segment decoded-payload metadata
///
/// `part_offset` is the zero-based position of this segment's decoded bytes
/// within the whole file and `part_size` their length. For a well-formed file
/// `part_offset + part_size` of one segment equals `part_offset` of the next.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct YencHeader {
    /// Original filename
    pub file_name: String,
    /// Size of the whole decoded file
    pub file_size: u64,
    /// Encoded line length
    pub line_length: usize,
    /// Part number, when the posting is multi-part
    pub part_number: Option<u32>,
    /// Total parts, when announced
    pub total_parts: Option<u32>,
    /// Zero-based offset of this part's data
    pub part_offset: u64,
    /// Decoded length of this part
    pub part_size: u64,
}

impl YencHeader {
    /// Combine a `=ybegin` line with the optional `=ypart` line
    pub fn from_parts(begin: &YencBegin, part: Option<&YencPart>) -> Result<Self> {
        let (part_offset, part_size) = match part {
            Some(p) => {
                if p.begin == 0 || p.end < p.begin {
                    return Err(NntpError::InvalidResponse(format!(
                        "Invalid yEnc part range {}-{}",
                        p.begin, p.end
                    )));
                }
                (p.begin - 1, p.end - p.begin + 1)
            }
            None => (0, begin.size),
        };

        Ok(Self {
            file_name: begin.name.clone(),
            file_size: begin.size,
            line_length: begin.line,
            part_number: begin.part,
            total_parts: begin.total,
            part_offset,
            part_size,
        })
    }

    /// Offset one past the last byte of this part
    pub fn part_end(&self) -> u64 {
        self.part_offset + self.part_size
    }
}

/// Complete yEnc decoded result
#[derive(Debug, Clone)]
pub struct YencDecoded {
    /// Parsed header information
    pub header: YencHeader,
    /// Trailer information
    pub trailer: YencEnd,
    /// Decoded binary data
    pub data: Vec<u8>,
    /// Calculated CRC32 of decoded data
    pub calculated_crc32: u32,
}

impl YencDecoded {
    /// Verify CRC32 matches expected value
    pub fn verify_crc32(&self) -> bool {
        // For multi-part files, check pcrc32 (part CRC)
        if let Some(expected) = self.trailer.pcrc32 {
            return self.calculated_crc32 == expected;
        }
        // For single-part files, check crc32
        if let Some(expected) = self.trailer.crc32 {
            return self.calculated_crc32 == expected;
        }
        false
    }

    /// Whether the trailer carries a checksum that does not match the data
    ///
    /// A trailer without any checksum is not a mismatch.
    pub fn crc_mismatch(&self) -> bool {
        let has_crc = self.trailer.pcrc32.is_some() || self.trailer.crc32.is_some();
        has_crc && !self.verify_crc32()
    }

    /// Check if this is a multi-part file
    pub fn is_multipart(&self) -> bool {
        self.header.part_number.is_some()
    }
}
