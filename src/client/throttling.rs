//! Cap on concurrent downloads

use super::{DecodedArticle, DecodedSegment, NntpClient, OnConnectionReady};
use crate::commands::{ArticleHeaders, ArticleStat};
use crate::context::{Priority, RequestContext, UsageContext};
use crate::error::Result;
use crate::gate::{GatePermit, PrioritySemaphore};
use crate::yenc::YencHeader;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::trace;

/// Limits how many BODY/ARTICLE downloads run at once
///
/// STAT, HEAD, DATE and header lookups pass straight through, so queue and
/// health-check work is never stuck behind bulk downloads. Downloads tagged
/// [`UsageContext::Streaming`] or [`UsageContext::BufferedStreaming`] wait at
/// high priority, everything else at low priority, unless the context sets
/// its own.
#[derive(Debug)]
pub struct ThrottlingClient<C> {
    inner: C,
    gate: PrioritySemaphore,
}

impl<C: NntpClient> ThrottlingClient<C> {
    /// Allow at most `max_downloads` concurrent downloads through `inner`
    pub fn new(inner: C, max_downloads: usize, high_priority_odds: u8) -> Self {
        Self {
            inner,
            gate: PrioritySemaphore::new(max_downloads, high_priority_odds),
        }
    }

    /// The wrapped client
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Change the download cap; running downloads are unaffected
    pub fn set_max_downloads(&self, max_downloads: usize) {
        self.gate.set_max(max_downloads);
    }

    /// Change the high-priority odds (percent)
    pub fn set_priority_odds(&self, high_priority_odds: u8) {
        self.gate.set_priority_odds(high_priority_odds);
    }

    /// Downloads currently running
    pub fn downloads_in_flight(&self) -> usize {
        self.gate.in_use()
    }

    async fn admit(&self, ctx: &RequestContext) -> Result<GatePermit> {
        let default = match ctx.usage() {
            UsageContext::Streaming | UsageContext::BufferedStreaming => Priority::High,
            _ => Priority::Low,
        };
        let priority = ctx.priority_or(default);
        trace!("download slot requested at {:?} priority", priority);
        self.gate.acquire(priority, 0, ctx.cancellation()).await
    }
}

#[async_trait]
impl<C: NntpClient> NntpClient for ThrottlingClient<C> {
    async fn stat(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleStat> {
        self.inner.stat(segment_id, ctx).await
    }

    async fn head(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleHeaders> {
        self.inner.head(segment_id, ctx).await
    }

    async fn yenc_header(&self, segment_id: &str, ctx: &RequestContext) -> Result<YencHeader> {
        self.inner.yenc_header(segment_id, ctx).await
    }

    async fn decoded_body_streaming(
        &self,
        segment_id: &str,
        ctx: &RequestContext,
        on_ready: Option<OnConnectionReady>,
    ) -> Result<DecodedSegment> {
        let _permit = self.admit(ctx).await?;
        self.inner
            .decoded_body_streaming(segment_id, ctx, on_ready)
            .await
    }

    async fn decoded_article(&self, segment_id: &str, ctx: &RequestContext) -> Result<DecodedArticle> {
        let _permit = self.admit(ctx).await?;
        self.inner.decoded_article(segment_id, ctx).await
    }

    async fn date(&self, ctx: &RequestContext) -> Result<DateTime<Utc>> {
        self.inner.date(ctx).await
    }
}
