//! Sequential segment concatenation without read-ahead

use super::ByteStream;
use crate::client::{DecodedSegment, NntpClient};
use crate::context::RequestContext;
use crate::error::{NntpError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Check that a fetched segment continues the file exactly where the
/// previous one ended
pub(super) fn check_placement(segment: &DecodedSegment, expected_offset: u64) -> Result<()> {
    let header = &segment.header;
    if header.part_offset != expected_offset {
        return Err(NntpError::CorruptMetadata(format!(
            "segment {} starts at {}, expected {}",
            segment.segment_id, header.part_offset, expected_offset
        )));
    }
    if segment.data.len() as u64 != header.part_size {
        return Err(NntpError::CorruptMetadata(format!(
            "segment {} decoded to {} bytes, header announces {}",
            segment.segment_id,
            segment.data.len(),
            header.part_size
        )));
    }
    Ok(())
}

/// Decoded bytes of consecutive segments, fetching each one only after the
/// previous one has been read completely
///
/// Holds at most one connection at a time. Starts at a segment boundary:
/// `first_offset` must be the decoded offset of `segment_ids[first_index]`.
pub struct UnbufferedSegmentStream {
    client: Arc<dyn NntpClient>,
    segment_ids: Arc<[String]>,
    next_index: usize,
    expected_offset: u64,
    current: Vec<u8>,
    pos: usize,
    ctx: RequestContext,
}

impl UnbufferedSegmentStream {
    /// Stream segments `first_index..` of `segment_ids`
    pub fn new(
        client: Arc<dyn NntpClient>,
        segment_ids: Arc<[String]>,
        first_index: usize,
        first_offset: u64,
        ctx: RequestContext,
    ) -> Self {
        Self {
            client,
            segment_ids,
            next_index: first_index,
            expected_offset: first_offset,
            current: Vec::new(),
            pos: 0,
            ctx,
        }
    }
}

#[async_trait]
impl ByteStream for UnbufferedSegmentStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.current.len() {
            let Some(id) = self.segment_ids.get(self.next_index) else {
                return Ok(0);
            };
            trace!("fetching segment {} ({})", self.next_index, id);
            let segment = self.client.decoded_body(id, &self.ctx).await?;
            check_placement(&segment, self.expected_offset)?;

            self.expected_offset = segment.header.part_end();
            self.next_index += 1;
            self.current = segment.data;
            self.pos = 0;
        }

        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
