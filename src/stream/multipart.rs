//! Several segmented files joined end to end

use super::file::{NzbFileStream, StreamOptions};
use super::sub_range::SubRangeStream;
use super::{ByteStream, SeekableStream};
use crate::client::NntpClient;
use crate::context::RequestContext;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// One piece of a multipart file: a byte range of a posted file
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilePart {
    /// Segments of the posted file, in order
    pub segment_ids: Vec<String>,
    /// Decoded size of the posted file
    pub file_size: u64,
    /// First byte of the range within the posted file
    pub offset: u64,
    /// Length of the range
    pub length: u64,
}

impl FilePart {
    /// The whole posted file
    pub fn whole(segment_ids: Vec<String>, file_size: u64) -> Self {
        Self {
            segment_ids,
            file_size,
            offset: 0,
            length: file_size,
        }
    }

    /// `length` bytes of the posted file starting at `offset`
    pub fn range(segment_ids: Vec<String>, file_size: u64, offset: u64, length: u64) -> Self {
        Self {
            segment_ids,
            file_size,
            offset,
            length,
        }
    }
}

type PartStream = SubRangeStream<NzbFileStream>;

/// Byte ranges of several posted files read as one stream
///
/// Typical use is a file stored across the volumes of a split archive. At
/// most one part is open at a time; moving to another part drops the open
/// one, and with it any read-ahead it started.
pub struct MultipartFileStream {
    client: Arc<dyn NntpClient>,
    parts: Vec<FilePart>,
    /// Offset of each part within the whole stream
    starts: Vec<u64>,
    len: u64,
    pos: u64,
    options: StreamOptions,
    ctx: RequestContext,
    current: Option<(usize, PartStream)>,
}

impl MultipartFileStream {
    /// Join `parts` in the given order
    pub fn new(
        client: Arc<dyn NntpClient>,
        parts: Vec<FilePart>,
        options: StreamOptions,
        ctx: &RequestContext,
    ) -> Self {
        let mut starts = Vec::with_capacity(parts.len());
        let mut len = 0u64;
        for part in &parts {
            starts.push(len);
            len += part.length;
        }
        Self {
            client,
            parts,
            starts,
            len,
            pos: 0,
            options,
            ctx: ctx.clone(),
            current: None,
        }
    }

    /// Number of parts
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Index of the open part, if any
    pub fn current_part(&self) -> Option<usize> {
        self.current.as_ref().map(|(index, _)| *index)
    }

    /// Part covering `offset`, which must be below `len`
    fn part_at(&self, offset: u64) -> usize {
        // Last part starting at or before the offset; empty parts share
        // their start with the next part and are skipped this way
        self.starts.partition_point(|&start| start <= offset) - 1
    }

    fn open_part(&self, index: usize) -> PartStream {
        let part = &self.parts[index];
        trace!("opening part {} of {}", index, self.parts.len());
        let file = NzbFileStream::new(
            self.client.clone(),
            part.segment_ids.clone(),
            part.file_size,
            self.options,
            &self.ctx,
        );
        SubRangeStream::new(file, part.offset, part.length)
    }
}

#[async_trait]
impl ByteStream for MultipartFileStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos >= self.len {
                return Ok(0);
            }

            let index = self.part_at(self.pos);
            let mut stream = match self.current.take() {
                Some((open, stream)) if open == index => stream,
                _ => {
                    let mut stream = self.open_part(index);
                    stream.seek(self.pos - self.starts[index]).await?;
                    stream
                }
            };

            let n = stream.read(buf).await?;
            self.current = Some((index, stream));
            if n > 0 {
                self.pos += n as u64;
                return Ok(n);
            }
            // The part was clamped shorter than announced; skip its tail
            self.pos = self.starts.get(index + 1).copied().unwrap_or(self.len);
        }
    }
}

#[async_trait]
impl SeekableStream for MultipartFileStream {
    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.pos
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        let offset = offset.min(self.len);
        if offset == self.pos {
            return Ok(());
        }
        self.pos = offset;

        if offset < self.len {
            let index = self.part_at(offset);
            if let Some((open, stream)) = self.current.as_mut()
                && *open == index
            {
                return stream.seek(offset - self.starts[index]).await;
            }
        }
        self.current = None;
        Ok(())
    }
}
