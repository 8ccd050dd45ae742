//! Byte streams over segmented Usenet files
//!
//! A posted file is split into segments whose decoded bytes sit at known
//! offsets (from each segment's yEnc header). The types here turn an ordered
//! segment list into a seekable byte stream and compose such streams:
//!
//! - [`NzbFileStream`]: one file, seekable, locating segments by
//!   interpolation search
//! - [`UnbufferedSegmentStream`] / [`BufferedSegmentStream`]: sequential
//!   reads starting at a segment boundary
//! - [`MultipartFileStream`]: several files joined end to end by byte range
//! - [`SubRangeStream`]: a byte window of another stream
//! - [`AesDecoderStream`]: AES-CBC decryption with random access
//!
//! Errors are [`NntpError`]s, never I/O errors, so a missing article stays
//! distinguishable from a transient failure all the way up.

mod aes;
mod buffered;
mod file;
#[cfg(test)]
pub(crate) mod fixtures;
mod interpolation;
mod multipart;
mod segments;
mod sub_range;

pub use self::aes::AesDecoderStream;
pub use buffered::BufferedSegmentStream;
pub use file::{NzbFileStream, StreamOptions};
pub use interpolation::{SegmentRange, find_segment};
pub use multipart::{FilePart, MultipartFileStream};
pub use segments::UnbufferedSegmentStream;
pub use sub_range::SubRangeStream;

use crate::error::{NntpError, Result};
use async_trait::async_trait;

/// Sequential reader
#[async_trait]
pub trait ByteStream: Send {
    /// Read up to `buf.len()` bytes; `Ok(0)` means end of stream
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Reader with a known length and random access
#[async_trait]
pub trait SeekableStream: ByteStream {
    /// Total length in bytes
    fn len(&self) -> u64;

    /// Whether the stream is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of the next byte [`read`](ByteStream::read) returns
    fn position(&self) -> u64;

    /// Move to `offset`; offsets past the end are clamped to the end
    async fn seek(&mut self, offset: u64) -> Result<()>;
}

#[async_trait]
impl<S: ByteStream + ?Sized> ByteStream for Box<S> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf).await
    }
}

#[async_trait]
impl<S: SeekableStream + ?Sized> SeekableStream for Box<S> {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        (**self).seek(offset).await
    }
}

/// Fill `buf` as far as the stream allows; returns bytes read
pub async fn read_full<S: ByteStream + ?Sized>(stream: &mut S, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read everything that is left
pub async fn read_to_end<S: ByteStream + ?Sized>(stream: &mut S) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&chunk[..n]);
    }
}

/// Read and throw away `count` bytes
///
/// # Errors
///
/// [`NntpError::CorruptMetadata`] if the stream ends first.
pub async fn discard<S: ByteStream + ?Sized>(stream: &mut S, mut count: u64) -> Result<()> {
    let mut scratch = vec![0u8; 64 * 1024];
    while count > 0 {
        let want = scratch.len().min(count as usize);
        let n = stream.read(&mut scratch[..want]).await?;
        if n == 0 {
            return Err(NntpError::CorruptMetadata(format!(
                "stream ended with {} bytes left to skip",
                count
            )));
        }
        count -= n as u64;
    }
    Ok(())
}

/// In-memory seekable stream
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryStream {
    /// Stream over `data`
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    /// The underlying bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[async_trait]
impl ByteStream for MemoryStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[async_trait]
impl SeekableStream for MemoryStream {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        self.pos = offset.min(self.data.len() as u64) as usize;
        Ok(())
    }
}
