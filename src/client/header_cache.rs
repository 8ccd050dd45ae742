//! In-memory cache of yEnc headers

use super::{DecodedArticle, DecodedSegment, NntpClient, OnConnectionReady};
use crate::cache::LruCache;
use crate::commands::{ArticleHeaders, ArticleStat};
use crate::context::RequestContext;
use crate::error::Result;
use crate::yenc::YencHeader;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tracing::trace;

/// Remembers the yEnc header of every segment seen
///
/// Seeking in a file looks up segment headers repeatedly; with this layer
/// only the first lookup per segment costs a round trip. Headers are also
/// captured from full body downloads.
#[derive(Debug)]
pub struct HeaderCachingClient<C> {
    inner: C,
    cache: Mutex<LruCache<String, YencHeader>>,
}

impl<C: NntpClient> HeaderCachingClient<C> {
    /// Cache up to `capacity` headers in front of `inner`
    pub fn new(inner: C, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The wrapped client
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Number of cached headers
    pub fn cached_headers(&self) -> usize {
        self.lock().len()
    }

    /// Forget every cached header
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, YencHeader>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remember(&self, segment_id: &str, header: &YencHeader) {
        self.lock().put(segment_id.to_string(), header.clone());
    }
}

#[async_trait]
impl<C: NntpClient> NntpClient for HeaderCachingClient<C> {
    async fn stat(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleStat> {
        self.inner.stat(segment_id, ctx).await
    }

    async fn head(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleHeaders> {
        self.inner.head(segment_id, ctx).await
    }

    async fn yenc_header(&self, segment_id: &str, ctx: &RequestContext) -> Result<YencHeader> {
        let cached = self.lock().get(&segment_id.to_string()).cloned();
        if let Some(header) = cached {
            trace!("yEnc header cache hit for {}", segment_id);
            return Ok(header);
        }

        let header = self.inner.yenc_header(segment_id, ctx).await?;
        self.remember(segment_id, &header);
        Ok(header)
    }

    async fn decoded_body_streaming(
        &self,
        segment_id: &str,
        ctx: &RequestContext,
        on_ready: Option<OnConnectionReady>,
    ) -> Result<DecodedSegment> {
        let segment = self
            .inner
            .decoded_body_streaming(segment_id, ctx, on_ready)
            .await?;
        self.remember(segment_id, &segment.header);
        Ok(segment)
    }

    async fn decoded_article(&self, segment_id: &str, ctx: &RequestContext) -> Result<DecodedArticle> {
        let article = self.inner.decoded_article(segment_id, ctx).await?;
        self.remember(segment_id, &article.segment.header);
        Ok(article)
    }

    async fn date(&self, ctx: &RequestContext) -> Result<DateTime<Utc>> {
        self.inner.date(ctx).await
    }
}
