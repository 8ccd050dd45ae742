use crate::{NntpError, Result};
use crc32fast::Hasher;

/// Placement of an encoded part within a multi-part file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpec {
    /// 1-based part number
    pub number: u32,
    /// Total number of parts
    pub total: u32,
    /// Zero-based offset of the part's first byte in the file
    pub offset: u64,
    /// Size of the whole file
    pub file_size: u64,
}

/// Encode binary data to yEnc format
///
/// Produces `=ybegin` (plus `=ypart` when `part` is given), CRLF-terminated
/// data lines no longer than `line_length`, and `=yend` carrying `crc32` for
/// single-part output or `pcrc32` for a part.
///
/// # Example
/// ```ignore
/// let encoded = encode(b"Hello", "test.bin", 128, None)?;
/// assert_eq!(decode(&encoded)?.data, b"Hello");
/// ```
pub fn encode(
    data: &[u8],
    filename: &str,
    line_length: usize,
    part: Option<PartSpec>,
) -> Result<Vec<u8>> {
    if line_length < 2 || line_length > 997 {
        return Err(NntpError::Other(format!(
            "Invalid line length: {} (must be 2-997)",
            line_length
        )));
    }

    let mut output = Vec::with_capacity(data.len() + data.len() / 32 + 128);

    match part {
        Some(p) => {
            output.extend_from_slice(
                format!(
                    "=ybegin part={} total={} line={} size={} name={}\r\n",
                    p.number, p.total, line_length, p.file_size, filename
                )
                .as_bytes(),
            );
            // =ypart offsets are 1-based and inclusive
            output.extend_from_slice(
                format!(
                    "=ypart begin={} end={}\r\n",
                    p.offset + 1,
                    p.offset + data.len() as u64
                )
                .as_bytes(),
            );
        }
        None => {
            output.extend_from_slice(
                format!(
                    "=ybegin line={} size={} name={}\r\n",
                    line_length,
                    data.len(),
                    filename
                )
                .as_bytes(),
            );
        }
    }

    encode_data(data, line_length, &mut output);

    let mut hasher = Hasher::new();
    hasher.update(data);
    let crc32 = hasher.finalize();

    let trailer = match part {
        Some(p) => format!(
            "=yend size={} part={} pcrc32={:08x}\r\n",
            data.len(),
            p.number,
            crc32
        ),
        None => format!("=yend size={} crc32={:08x}\r\n", data.len(), crc32),
    };
    output.extend_from_slice(trailer.as_bytes());

    Ok(output)
}

/// Encode the payload into lines
///
/// NUL, LF, CR and `=` are always escaped. TAB and SPACE are escaped at either
/// end of a line, and `.` at the start of a line so the body never needs
/// dot-stuffing. An escape in the last column may push a line to
/// `line_length + 1` bytes, as other yEnc encoders do.
fn encode_data(data: &[u8], line_length: usize, output: &mut Vec<u8>) {
    let mut line_len = 0usize;

    for (i, &byte) in data.iter().enumerate() {
        let encoded = byte.wrapping_add(42);
        let at_start = line_len == 0;
        let is_last = i + 1 == data.len();
        let at_end = is_last || line_len + 1 >= line_length;

        let escape = is_critical_byte(encoded)
            || (at_start && matches!(encoded, b'\t' | b' ' | b'.'))
            || (at_end && matches!(encoded, b'\t' | b' '));

        if escape {
            output.push(b'=');
            output.push(encoded.wrapping_add(64));
            line_len += 2;
        } else {
            output.push(encoded);
            line_len += 1;
        }

        if line_len >= line_length {
            output.extend_from_slice(b"\r\n");
            line_len = 0;
        }
    }

    if line_len > 0 {
        output.extend_from_slice(b"\r\n");
    }
}

/// Bytes that must be escaped wherever they appear
fn is_critical_byte(byte: u8) -> bool {
    matches!(byte, 0x00 | b'\n' | b'\r' | b'=')
}
