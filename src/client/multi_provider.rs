//! Failover across providers

use super::stats::StatsRecorder;
use super::{
    DecodedArticle, DecodedSegment, GroupStats, NntpClient, OnConnectionReady, ProviderClient,
};
use crate::commands::{ArticleHeaders, ArticleStat};
use crate::config::{ProviderConfig, ProviderTier};
use crate::context::RequestContext;
use crate::error::{NntpError, Result};
use crate::pool::PoolSnapshot;
use crate::yenc::YencHeader;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// One provider as seen by [`MultiProviderClient`]
#[derive(Clone)]
pub struct ProviderEntry {
    config: Arc<ProviderConfig>,
    client: Arc<dyn ProviderClient>,
    stats: Arc<StatsRecorder>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("server", &self.config.server_id())
            .field("tier", &self.config.tier)
            .field("snapshot", &self.client.snapshot())
            .finish()
    }
}

impl ProviderEntry {
    /// Bind a provider configuration to the client serving it
    pub fn new(config: Arc<ProviderConfig>, client: Arc<dyn ProviderClient>) -> Self {
        let stats = Arc::new(StatsRecorder::new(config.server_id()));
        Self {
            config,
            client,
            stats,
        }
    }

    /// Provider configuration
    pub fn config(&self) -> &Arc<ProviderConfig> {
        &self.config
    }

    /// Failover tier
    pub fn tier(&self) -> ProviderTier {
        self.config.tier
    }

    /// Client serving this provider
    pub fn client(&self) -> &Arc<dyn ProviderClient> {
        &self.client
    }
}

/// What failover needs to know about an answer
trait Answer {
    /// The provider answered, but does not have the article
    fn is_missing(&self) -> bool {
        false
    }

    /// Decoded bytes carried, for statistics
    fn byte_len(&self) -> u64 {
        0
    }
}

impl Answer for ArticleStat {
    fn is_missing(&self) -> bool {
        !self.exists()
    }
}

impl Answer for ArticleHeaders {}
impl Answer for YencHeader {}
impl Answer for DateTime<Utc> {}

impl Answer for DecodedSegment {
    fn byte_len(&self) -> u64 {
        self.data.len() as u64
    }
}

impl Answer for DecodedArticle {
    fn byte_len(&self) -> u64 {
        self.segment.data.len() as u64
    }
}

/// Runs operations against providers in priority order
///
/// Candidates are the non-disabled providers, ordered by tier and, within a
/// tier, by most available connections first. A provider that fails or
/// lacks the article hands over to the next one. The last candidate's
/// answer is final: its "not found" or its error is what the caller sees.
/// Cancellation ends the loop at once.
///
/// The provider list can be swapped at runtime with
/// [`set_providers`](Self::set_providers); operations already running keep
/// the list they started with.
pub struct MultiProviderClient {
    providers: RwLock<Arc<Vec<ProviderEntry>>>,
    failover_count: AtomicU64,
}

impl std::fmt::Debug for MultiProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiProviderClient")
            .field("providers", &self.providers())
            .finish()
    }
}

impl MultiProviderClient {
    /// Create a client over `providers` (configuration order)
    pub fn new(providers: Vec<ProviderEntry>) -> Self {
        Self {
            providers: RwLock::new(Arc::new(providers)),
            failover_count: AtomicU64::new(0),
        }
    }

    /// Current providers in configuration order
    pub fn providers(&self) -> Arc<Vec<ProviderEntry>> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swap the provider list, returning the previous one
    pub fn set_providers(&self, providers: Vec<ProviderEntry>) -> Arc<Vec<ProviderEntry>> {
        let mut guard = self.providers.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(providers))
    }

    /// Providers in the order the next operation would try them
    pub fn ordered_providers(&self) -> Vec<ProviderEntry> {
        let mut candidates: Vec<ProviderEntry> = self
            .providers()
            .iter()
            .filter(|p| p.tier() != ProviderTier::Disabled)
            .cloned()
            .collect();
        // Stable: equal keys keep configuration order
        candidates.sort_by_cached_key(|p| (p.tier(), Reverse(p.client.available_connections())));
        candidates
    }

    /// Pool counts per provider, in configuration order
    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        self.providers()
            .iter()
            .map(|p| p.client.snapshot())
            .collect()
    }

    /// Request statistics of every provider
    pub fn stats(&self) -> GroupStats {
        let per_provider: Vec<_> = self.providers().iter().map(|p| p.stats.snapshot()).collect();
        GroupStats {
            total_requests: per_provider.iter().map(|s| s.requests).sum(),
            total_not_found: per_provider.iter().map(|s| s.not_found).sum(),
            failover_count: self.failover_count.load(Ordering::Relaxed),
            per_provider,
        }
    }

    /// Shut down every provider's pool
    pub async fn shutdown(&self) {
        for provider in self.providers().iter() {
            provider.client.shutdown().await;
        }
    }

    async fn execute<'a, T, Op>(&self, command: &'static str, ctx: &RequestContext, op: Op) -> Result<T>
    where
        T: Answer + Send,
        Op: Fn(Arc<dyn ProviderClient>) -> BoxFuture<'a, Result<T>> + Send + Sync,
    {
        let candidates = self.ordered_providers();
        if candidates.is_empty() {
            return Err(NntpError::NoProvidersConfigured);
        }

        let last = candidates.len() - 1;
        for (i, provider) in candidates.iter().enumerate() {
            ctx.check_cancelled()?;
            let server = provider.config.server_id();

            match op(provider.client.clone()).await {
                Ok(answer) if answer.is_missing() => {
                    provider.stats.record_not_found();
                    if i == last {
                        return Ok(answer);
                    }
                    debug!("{} missing on {}, trying next provider", command, server);
                }
                Ok(answer) => {
                    provider.stats.record_success(answer.byte_len());
                    return Ok(answer);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) if e.is_article_not_found() => {
                    provider.stats.record_not_found();
                    if i == last {
                        return Err(e);
                    }
                    debug!("{} not found on {}, trying next provider", command, server);
                }
                Err(e) => {
                    provider.stats.record_failure();
                    if i == last {
                        return Err(e);
                    }
                    warn!("{} failed on {}: {}, failing over", command, server, e);
                }
            }
            self.failover_count.fetch_add(1, Ordering::Relaxed);
        }

        // The loop returns on its last iteration
        Err(NntpError::NoProvidersConfigured)
    }
}

#[async_trait]
impl NntpClient for MultiProviderClient {
    async fn stat(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleStat> {
        self.execute("STAT", ctx, |client| {
            Box::pin(async move { client.stat(segment_id, ctx).await })
        })
        .await
    }

    async fn head(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleHeaders> {
        self.execute("HEAD", ctx, |client| {
            Box::pin(async move { client.head(segment_id, ctx).await })
        })
        .await
    }

    async fn yenc_header(&self, segment_id: &str, ctx: &RequestContext) -> Result<YencHeader> {
        self.execute("BODY (header)", ctx, |client| {
            Box::pin(async move { client.yenc_header(segment_id, ctx).await })
        })
        .await
    }

    async fn decoded_body_streaming(
        &self,
        segment_id: &str,
        ctx: &RequestContext,
        on_ready: Option<OnConnectionReady>,
    ) -> Result<DecodedSegment> {
        // Whichever provider answers signals readiness; failed attempts do not
        let slot = on_ready.map(|f| Arc::new(Mutex::new(Some(f))));
        self.execute("BODY", ctx, |client| {
            let notify = slot.clone().map(|slot| -> OnConnectionReady {
                Box::new(move || {
                    let f = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
                    if let Some(f) = f {
                        f();
                    }
                })
            });
            Box::pin(async move { client.decoded_body_streaming(segment_id, ctx, notify).await })
        })
        .await
    }

    async fn decoded_article(&self, segment_id: &str, ctx: &RequestContext) -> Result<DecodedArticle> {
        self.execute("ARTICLE", ctx, |client| {
            Box::pin(async move { client.decoded_article(segment_id, ctx).await })
        })
        .await
    }

    async fn date(&self, ctx: &RequestContext) -> Result<DateTime<Utc>> {
        self.execute("DATE", ctx, |client| {
            Box::pin(async move { client.date(ctx).await })
        })
        .await
    }
}
