//! Logical NNTP clients
//!
//! Everything above a single session speaks [`NntpClient`]: one logical
//! operation per call, routed through whatever pooling, retry, failover,
//! throttling and caching layers were composed. Each layer is a small type
//! wrapping the next one:
//!
//! ```text
//! ArticleCachingClient      decoded bodies on local disk
//!   HeaderCachingClient     yEnc headers in memory
//!     ThrottlingClient      caps concurrent downloads
//!       MultiProviderClient failover across providers
//!         MultiConnectionClient  retry on a fresh session
//!           ConnectionPool
//! ```

mod article_cache;
mod header_cache;
mod multi_connection;
mod multi_provider;
mod stats;
mod throttling;

pub use article_cache::ArticleCachingClient;
pub use header_cache::HeaderCachingClient;
pub use multi_connection::MultiConnectionClient;
pub use multi_provider::{MultiProviderClient, ProviderEntry};
pub use stats::{GroupStats, ProviderStats};
pub use throttling::ThrottlingClient;

use crate::commands::{ArticleHeaders, ArticleStat};
use crate::context::RequestContext;
use crate::error::{NntpError, Result};
use crate::pool::PoolSnapshot;
use crate::yenc::{self, YencHeader};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Called once the session that served a body is back in its pool
///
/// It fires after the whole body has been read and decoded and the session
/// returned, right before the decoded segment is handed back; it never fires
/// mid-read. Dropping it without calling it is also a signal: it happens
/// when the fetch failed.
pub type OnConnectionReady = Box<dyn FnOnce() + Send>;

/// A segment body after yEnc decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSegment {
    /// Segment (message) id it was fetched with
    pub segment_id: String,
    /// Placement of `data` within the file
    pub header: YencHeader,
    /// Decoded bytes
    pub data: Vec<u8>,
}

impl DecodedSegment {
    /// Decode a raw BODY payload
    ///
    /// # Errors
    ///
    /// [`NntpError::InvalidResponse`] when the payload is not valid yEnc or
    /// its checksum does not match.
    pub fn from_body(segment_id: &str, body: &[u8]) -> Result<Self> {
        let decoded = yenc::decode(body)?;
        if decoded.crc_mismatch() {
            return Err(NntpError::InvalidResponse(format!(
                "CRC32 mismatch in {} (calculated {:08x})",
                segment_id, decoded.calculated_crc32
            )));
        }
        Ok(Self {
            segment_id: segment_id.to_string(),
            header: decoded.header,
            data: decoded.data,
        })
    }
}

/// A whole article: headers plus decoded body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedArticle {
    /// Article headers
    pub headers: ArticleHeaders,
    /// Decoded body
    pub segment: DecodedSegment,
}

impl DecodedArticle {
    /// Split and decode a raw ARTICLE payload
    pub fn from_article(segment_id: &str, article: &[u8]) -> Result<Self> {
        let (headers, body) = crate::commands::split_article(article);
        Ok(Self {
            headers,
            segment: DecodedSegment::from_body(segment_id, body)?,
        })
    }
}

/// One logical NNTP operation per call
///
/// Missing segments are reported as [`NntpError::NoSuchArticle`] by every
/// method except [`stat`](Self::stat), which answers
/// [`ArticleStat::Missing`].
#[async_trait]
pub trait NntpClient: Send + Sync {
    /// Whether a segment exists
    async fn stat(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleStat>;

    /// Header block of a segment
    async fn head(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleHeaders>;

    /// yEnc placement of a segment, without transferring its data when possible
    async fn yenc_header(&self, segment_id: &str, ctx: &RequestContext) -> Result<YencHeader>;

    /// Decoded body of a segment
    async fn decoded_body(&self, segment_id: &str, ctx: &RequestContext) -> Result<DecodedSegment> {
        self.decoded_body_streaming(segment_id, ctx, None).await
    }

    /// Decoded body, signalling `on_ready` once the body is decoded and its
    /// session is back in the pool
    async fn decoded_body_streaming(
        &self,
        segment_id: &str,
        ctx: &RequestContext,
        on_ready: Option<OnConnectionReady>,
    ) -> Result<DecodedSegment>;

    /// Headers and decoded body of a segment
    async fn decoded_article(&self, segment_id: &str, ctx: &RequestContext) -> Result<DecodedArticle>;

    /// Server clock
    async fn date(&self, ctx: &RequestContext) -> Result<DateTime<Utc>>;
}

/// A client bound to one provider, exposing its connection counts
#[async_trait]
pub trait ProviderClient: NntpClient {
    /// Current pool counts
    fn snapshot(&self) -> PoolSnapshot;

    /// Capacity not currently borrowed
    fn available_connections(&self) -> usize {
        self.snapshot().available()
    }

    /// Close idle sessions and refuse new work
    async fn shutdown(&self) {}
}

#[async_trait]
impl<T: NntpClient + ?Sized> NntpClient for Arc<T> {
    async fn stat(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleStat> {
        (**self).stat(segment_id, ctx).await
    }

    async fn head(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleHeaders> {
        (**self).head(segment_id, ctx).await
    }

    async fn yenc_header(&self, segment_id: &str, ctx: &RequestContext) -> Result<YencHeader> {
        (**self).yenc_header(segment_id, ctx).await
    }

    async fn decoded_body_streaming(
        &self,
        segment_id: &str,
        ctx: &RequestContext,
        on_ready: Option<OnConnectionReady>,
    ) -> Result<DecodedSegment> {
        (**self).decoded_body_streaming(segment_id, ctx, on_ready).await
    }

    async fn decoded_article(&self, segment_id: &str, ctx: &RequestContext) -> Result<DecodedArticle> {
        (**self).decoded_article(segment_id, ctx).await
    }

    async fn date(&self, ctx: &RequestContext) -> Result<DateTime<Utc>> {
        (**self).date(ctx).await
    }
}
