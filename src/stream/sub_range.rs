//! Byte window over a seekable stream

use super::{ByteStream, SeekableStream};
use crate::error::{NntpError, Result};
use async_trait::async_trait;

/// Exposes `len` bytes of `inner` starting at `start` as a stream of its own
///
/// Used for files stored inside an archive volume. The inner stream is only
/// repositioned when a read follows a seek.
pub struct SubRangeStream<S> {
    inner: S,
    start: u64,
    len: u64,
    pos: u64,
    positioned: bool,
}

impl<S: SeekableStream> SubRangeStream<S> {
    /// Window `start..start + len` of `inner`, clamped to its length
    pub fn new(inner: S, start: u64, len: u64) -> Self {
        let start = start.min(inner.len());
        let len = len.min(inner.len() - start);
        Self {
            inner,
            start,
            len,
            pos: 0,
            positioned: false,
        }
    }

    /// Offset of the window within the inner stream
    pub fn start(&self) -> u64 {
        self.start
    }

    /// The wrapped stream
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: SeekableStream> ByteStream for SubRangeStream<S> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.len - self.pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        if !self.positioned {
            self.inner.seek(self.start + self.pos).await?;
            self.positioned = true;
        }

        let want = buf.len().min(remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(NntpError::CorruptMetadata(format!(
                "inner stream ended {} bytes into a {} byte range",
                self.pos, self.len
            )));
        }
        self.pos += n as u64;
        Ok(n)
    }
}

#[async_trait]
impl<S: SeekableStream> SeekableStream for SubRangeStream<S> {
    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.pos
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        let offset = offset.min(self.len);
        if offset != self.pos {
            self.pos = offset;
            self.positioned = false;
        }
        Ok(())
    }
}
