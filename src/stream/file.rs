//! Seekable stream over one segmented file

use super::buffered::BufferedSegmentStream;
use super::interpolation::find_segment;
use super::segments::UnbufferedSegmentStream;
use super::{ByteStream, SeekableStream, discard};
use crate::client::NntpClient;
use crate::context::RequestContext;
use crate::error::{NntpError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Default read-ahead depth in segments
pub const DEFAULT_BUFFER_SEGMENTS: usize = 8;

/// Default concurrent downloads per buffered stream
pub const DEFAULT_STREAM_CONNECTIONS: usize = 4;

/// How a file stream fetches its segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamOptions {
    /// Segments fetched ahead of the reader; `0` fetches one at a time
    pub buffer_segments: usize,
    /// Concurrent downloads when buffering
    pub connections: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            buffer_segments: DEFAULT_BUFFER_SEGMENTS,
            connections: DEFAULT_STREAM_CONNECTIONS,
        }
    }
}

impl StreamOptions {
    /// No read-ahead
    pub fn unbuffered() -> Self {
        Self {
            buffer_segments: 0,
            connections: 1,
        }
    }
}

/// Decoded contents of a file posted as an ordered list of segments
///
/// Opening is cheap: nothing is fetched until the first read. A read at a
/// position other than zero first locates the covering segment by
/// interpolation search over yEnc headers, then skips the bytes of that
/// segment before the position. Seeking only records the new position.
///
/// # Example
///
/// ```no_run
/// use nntp_stream::{NntpClient, NzbFileStream, RequestContext, SeekableStream, StreamOptions};
/// use std::sync::Arc;
///
/// # async fn example(client: Arc<dyn NntpClient>) -> nntp_stream::Result<()> {
/// let ids = vec!["part1@example".to_string(), "part2@example".to_string()];
/// let mut file =
///     NzbFileStream::open(client, ids, None, StreamOptions::default(), &RequestContext::new()).await?;
/// file.seek(file.len() / 2).await?;
/// let mut buf = vec![0u8; 4096];
/// let n = nntp_stream::stream::read_full(&mut file, &mut buf).await?;
/// # Ok(())
/// # }
/// ```
pub struct NzbFileStream {
    source: SegmentSource,
    len: u64,
    position: u64,
    inner: Option<Box<dyn ByteStream>>,
}

/// Everything needed to open a segment stream at some offset
struct SegmentSource {
    client: Arc<dyn NntpClient>,
    segment_ids: Arc<[String]>,
    options: StreamOptions,
    ctx: RequestContext,
}

impl SegmentSource {
    /// Segment stream positioned at `position` of a `len` byte file
    async fn open_at(&self, position: u64, len: u64) -> Result<Box<dyn ByteStream>> {
        let (index, start) = if position == 0 {
            (0, 0)
        } else {
            let client = &self.client;
            let ids = &self.segment_ids;
            let ctx = &self.ctx;
            let range = find_segment(position, ids.len(), len, |i| async move {
                let header = client.yenc_header(&ids[i], ctx).await?;
                Ok((header.part_offset, header.part_end()))
            })
            .await?;
            (range.index, range.start)
        };
        debug!(
            "opening segment stream at {} (segment {}, {} bytes in)",
            position,
            index,
            position - start
        );

        let mut stream: Box<dyn ByteStream> = if self.options.buffer_segments == 0 {
            Box::new(UnbufferedSegmentStream::new(
                self.client.clone(),
                self.segment_ids.clone(),
                index,
                start,
                self.ctx.clone(),
            ))
        } else {
            Box::new(BufferedSegmentStream::new(
                self.client.clone(),
                self.segment_ids.clone(),
                index,
                start,
                self.options.buffer_segments,
                self.options.connections,
                &self.ctx,
            ))
        };
        discard(&mut stream, position - start).await?;
        Ok(stream)
    }
}

impl NzbFileStream {
    /// Stream of a file whose decoded size is known
    pub fn new(
        client: Arc<dyn NntpClient>,
        segment_ids: impl Into<Arc<[String]>>,
        file_size: u64,
        options: StreamOptions,
        ctx: &RequestContext,
    ) -> Self {
        Self {
            source: SegmentSource {
                client,
                segment_ids: segment_ids.into(),
                options,
                ctx: ctx.clone(),
            },
            len: file_size,
            position: 0,
            inner: None,
        }
    }

    /// Stream of a file, taking its size from the last segment's yEnc header
    /// when `file_size` is `None`
    pub async fn open(
        client: Arc<dyn NntpClient>,
        segment_ids: impl Into<Arc<[String]>>,
        file_size: Option<u64>,
        options: StreamOptions,
        ctx: &RequestContext,
    ) -> Result<Self> {
        let segment_ids: Arc<[String]> = segment_ids.into();
        let file_size = match (file_size, segment_ids.last()) {
            (Some(size), _) => size,
            (None, None) => 0,
            (None, Some(last)) => client.yenc_header(last, ctx).await?.part_end(),
        };
        Ok(Self::new(client, segment_ids, file_size, options, ctx))
    }

    /// Number of segments
    pub fn segment_count(&self) -> usize {
        self.source.segment_ids.len()
    }
}

#[async_trait]
impl ByteStream for NzbFileStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.len - self.position;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        self.source.ctx.check_cancelled()?;

        let mut inner = match self.inner.take() {
            Some(inner) => inner,
            None => self.source.open_at(self.position, self.len).await?,
        };
        let want = buf.len().min(remaining.min(usize::MAX as u64) as usize);
        // A failed segment stream is dropped; the next read reopens at the
        // current position
        let n = inner.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(NntpError::CorruptMetadata(format!(
                "segments end at {} but the file is {} bytes",
                self.position, self.len
            )));
        }
        self.position += n as u64;
        self.inner = Some(inner);
        Ok(n)
    }
}

#[async_trait]
impl SeekableStream for NzbFileStream {
    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.position
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        let offset = offset.min(self.len);
        if offset != self.position {
            self.inner = None;
            self.position = offset;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::fixtures::Bodies;
    use crate::stream::{read_full, read_to_end};

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_sequential_read_matches_source() {
        let data = sample(10_000);
        let (bodies, ids) = Bodies::split(&data, 1000);
        let client = Arc::new(bodies);
        let mut file =
            NzbFileStream::new(client.clone(), ids, 10_000, StreamOptions::default(), &RequestContext::new());

        assert_eq!(read_to_end(&mut file).await.unwrap(), data);
        // Offset zero never needs a header lookup
        assert_eq!(client.header_lookups(), 0);
    }

    #[tokio::test]
    async fn test_open_derives_size_from_last_segment() {
        let data = sample(2500);
        let (bodies, ids) = Bodies::split(&data, 1000);
        let file = NzbFileStream::open(Arc::new(bodies), ids, None, StreamOptions::default(), &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(file.len(), 2500);
        assert_eq!(file.segment_count(), 3);
    }

    #[tokio::test]
    async fn test_seek_mid_segment() {
        let data = sample(10_000);
        let (bodies, ids) = Bodies::split(&data, 1000);
        let client = Arc::new(bodies);
        let mut file =
            NzbFileStream::new(client.clone(), ids, 10_000, StreamOptions::unbuffered(), &RequestContext::new());

        file.seek(5500).await.unwrap();
        let mut buf = vec![0u8; 700];
        assert_eq!(read_full(&mut file, &mut buf).await.unwrap(), 700);
        assert_eq!(buf, &data[5500..6200]);
        assert_eq!(file.position(), 6200);
        assert_eq!(client.fetched(), vec!["seg5", "seg6"]);
        assert_eq!(client.header_lookups(), 1);
    }

    #[tokio::test]
    async fn test_seek_same_position_keeps_stream() {
        let data = sample(3000);
        let (bodies, ids) = Bodies::split(&data, 1000);
        let client = Arc::new(bodies);
        let mut file =
            NzbFileStream::new(client.clone(), ids, 3000, StreamOptions::unbuffered(), &RequestContext::new());

        let mut buf = vec![0u8; 10];
        file.read(&mut buf).await.unwrap();
        file.seek(10).await.unwrap();
        file.seek(10).await.unwrap();
        file.read(&mut buf).await.unwrap();
        assert_eq!(buf, &data[10..20]);
        assert_eq!(client.fetched(), vec!["seg0"]);
    }

    #[tokio::test]
    async fn test_seek_back_and_forth() {
        let data = sample(8000);
        let (bodies, ids) = Bodies::split(&data, 1000);
        let mut file =
            NzbFileStream::new(Arc::new(bodies), ids, 8000, StreamOptions::default(), &RequestContext::new());

        for offset in [7999u64, 0, 3333, 1000, 4999] {
            file.seek(offset).await.unwrap();
            let mut buf = [0u8; 1];
            assert_eq!(file.read(&mut buf).await.unwrap(), 1);
            assert_eq!(buf[0], data[offset as usize], "offset {}", offset);
        }

        file.seek(u64::MAX).await.unwrap();
        assert_eq!(file.position(), 8000);
        let mut buf = [0u8; 1];
        assert_eq!(file.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_size_larger_than_segments_is_corrupt() {
        let data = sample(300);
        let (bodies, ids) = Bodies::split(&data, 100);
        let mut file =
            NzbFileStream::new(Arc::new(bodies), ids, 400, StreamOptions::unbuffered(), &RequestContext::new());
        let err = read_to_end(&mut file).await.unwrap_err();
        assert!(matches!(err, NntpError::CorruptMetadata(_)));
    }

    #[tokio::test]
    async fn test_failed_read_reopens_at_position() {
        let data = sample(3000);
        let (mut bodies, ids) = Bodies::split(&data, 1000);
        bodies.remove("seg1");
        let mut file =
            NzbFileStream::new(Arc::new(bodies), ids, 3000, StreamOptions::unbuffered(), &RequestContext::new());

        let mut buf = vec![0u8; 1000];
        assert_eq!(read_full(&mut file, &mut buf).await.unwrap(), 1000);
        let err = file.read(&mut buf).await.unwrap_err();
        assert!(err.is_article_not_found());
        assert_eq!(file.position(), 1000);

        // Header search for seg1 also hits the missing article
        let err = file.read(&mut buf).await.unwrap_err();
        assert!(err.is_article_not_found());
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_reads() {
        let data = sample(100);
        let (bodies, ids) = Bodies::split(&data, 50);
        let ctx = RequestContext::new();
        let mut file = NzbFileStream::new(Arc::new(bodies), ids, 100, StreamOptions::default(), &ctx);
        ctx.cancellation().cancel();

        let mut buf = [0u8; 10];
        assert!(file.read(&mut buf).await.unwrap_err().is_cancelled());
    }
}
