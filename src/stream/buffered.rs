//! Sequential segment concatenation with concurrent read-ahead

use super::ByteStream;
use super::segments::check_placement;
use crate::client::{DecodedSegment, NntpClient, OnConnectionReady};
use crate::context::{RequestContext, UsageContext};
use crate::error::{NntpError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Decoded bytes of consecutive segments, fetched ahead of the reader
///
/// Up to `buffer_segments` bodies are requested ahead of the read position,
/// at most `connections` of them on the wire at once. A fetch gives its
/// concurrency slot back as soon as its connection returns to the pool, so
/// the slot can start the next download while decoded data waits in the
/// buffer. Bytes are always delivered in segment order.
///
/// Dropping the stream cancels every outstanding fetch.
pub struct BufferedSegmentStream {
    client: Arc<dyn NntpClient>,
    segment_ids: Arc<[String]>,
    next_fetch: usize,
    expected_offset: u64,
    pending: VecDeque<JoinHandle<Result<DecodedSegment>>>,
    buffer_segments: usize,
    slots: Arc<Semaphore>,
    current: Vec<u8>,
    pos: usize,
    ctx: RequestContext,
}

impl BufferedSegmentStream {
    /// Stream segments `first_index..` of `segment_ids`
    ///
    /// `first_offset` must be the decoded offset of `segment_ids[first_index]`.
    /// Zero for either limit is treated as one.
    pub fn new(
        client: Arc<dyn NntpClient>,
        segment_ids: Arc<[String]>,
        first_index: usize,
        first_offset: u64,
        buffer_segments: usize,
        connections: usize,
        ctx: &RequestContext,
    ) -> Self {
        Self {
            client,
            segment_ids,
            next_fetch: first_index,
            expected_offset: first_offset,
            pending: VecDeque::new(),
            buffer_segments: buffer_segments.max(1),
            slots: Arc::new(Semaphore::new(connections.max(1))),
            current: Vec::new(),
            pos: 0,
            ctx: ctx.child().with_usage(UsageContext::BufferedStreaming),
        }
    }

    /// Number of fetches started but not yet consumed
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    fn top_up(&mut self) {
        while self.pending.len() < self.buffer_segments && self.next_fetch < self.segment_ids.len() {
            let id = self.segment_ids[self.next_fetch].clone();
            let client = self.client.clone();
            let slots = self.slots.clone();
            let ctx = self.ctx.clone();
            trace!("prefetching segment {} ({})", self.next_fetch, id);

            self.pending.push_back(tokio::spawn(async move {
                let slot = ctx
                    .run(async { slots.acquire_owned().await.map_err(|_| NntpError::Cancelled) })
                    .await?;
                let on_ready: OnConnectionReady = Box::new(move || drop(slot));
                client.decoded_body_streaming(&id, &ctx, Some(on_ready)).await
            }));
            self.next_fetch += 1;
        }
    }

    fn abort_pending(&mut self) {
        self.ctx.cancellation().cancel();
        for task in self.pending.drain(..) {
            task.abort();
        }
        self.next_fetch = self.segment_ids.len();
    }
}

#[async_trait]
impl ByteStream for BufferedSegmentStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.current.len() {
            self.top_up();
            let Some(task) = self.pending.pop_front() else {
                return Ok(0);
            };

            let fetched = match task.await {
                Ok(result) => result,
                Err(e) => Err(NntpError::Other(format!("segment fetch task failed: {}", e))),
            };
            let segment = match fetched.and_then(|s| check_placement(&s, self.expected_offset).map(|_| s)) {
                Ok(segment) => segment,
                Err(e) => {
                    debug!("buffered stream stopped: {}", e);
                    self.abort_pending();
                    return Err(e);
                }
            };

            self.expected_offset = segment.header.part_end();
            self.current = segment.data;
            self.pos = 0;
            self.top_up();
        }

        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Drop for BufferedSegmentStream {
    fn drop(&mut self) {
        self.abort_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::fixtures::{Bodies, ids};
    use crate::stream::read_to_end;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_delivers_in_order_despite_slow_fetch() {
        let client = Arc::new(
            Bodies::new(&[("a", 0, "one "), ("b", 4, "two "), ("c", 8, "three")], 13)
                .with_delay("a", Duration::from_millis(50)),
        );
        let mut stream = BufferedSegmentStream::new(
            client.clone(),
            ids(&["a", "b", "c"]),
            0,
            0,
            3,
            3,
            &RequestContext::new(),
        );
        assert_eq!(read_to_end(&mut stream).await.unwrap(), b"one two three");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_capped_by_connections() {
        let data: Vec<u8> = (0..100u8).collect();
        let (bodies, names) = Bodies::split(&data, 10);
        let bodies = names
            .iter()
            .fold(bodies, |b, id| b.with_delay(id, Duration::from_millis(10)));
        let client = Arc::new(bodies);

        let mut stream =
            BufferedSegmentStream::new(client.clone(), names, 0, 0, 6, 2, &RequestContext::new());
        assert_eq!(read_to_end(&mut stream).await.unwrap(), data);
        assert!(client.peak_in_flight() <= 2);
        assert_eq!(client.fetched().len(), 10);
    }

    #[tokio::test]
    async fn test_missing_segment_propagates() {
        let data = vec![7u8; 30];
        let (mut bodies, names) = Bodies::split(&data, 10);
        bodies.remove("seg1");

        let mut stream =
            BufferedSegmentStream::new(Arc::new(bodies), names, 0, 0, 4, 2, &RequestContext::new());
        let mut buf = [0u8; 64];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 10);
        let err = stream.read(&mut buf).await.unwrap_err();
        assert!(err.is_article_not_found());
        assert_eq!(stream.buffered(), 0);
    }

    #[tokio::test]
    async fn test_drop_cancels_outstanding_fetches() {
        let data = vec![1u8; 40];
        let (bodies, names) = Bodies::split(&data, 10);
        let parent = RequestContext::new();
        let mut stream = BufferedSegmentStream::new(Arc::new(bodies), names, 0, 0, 4, 1, &parent);

        let mut buf = [0u8; 5];
        stream.read(&mut buf).await.unwrap();
        let child = stream.ctx.clone();
        drop(stream);

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_starts_at_later_segment() {
        let data: Vec<u8> = (0..50u8).collect();
        let (bodies, names) = Bodies::split(&data, 10);
        let mut stream =
            BufferedSegmentStream::new(Arc::new(bodies), names, 3, 30, 2, 2, &RequestContext::new());
        assert_eq!(read_to_end(&mut stream).await.unwrap(), &data[30..]);
    }
}
