//! Retrying client over one provider's pool

use super::{DecodedArticle, DecodedSegment, NntpClient, OnConnectionReady, ProviderClient};
use crate::commands::{ArticleHeaders, ArticleStat};
use crate::connection::{ArticleConnection, ConnectionFactory};
use crate::context::{Priority, RequestContext};
use crate::error::Result;
use crate::pool::{ConnectionPool, PoolSnapshot};
use crate::yenc::YencHeader;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{debug, warn};

/// Runs each operation on a pooled session, retrying on a fresh one
///
/// A failed or abandoned command marks its session for replacement, so a
/// suspect session never goes back to the pool. Missing articles are not
/// retried: the session is returned normally and the error propagates so the
/// caller can try another provider. Cancellation is never retried.
///
/// STAT, HEAD, DATE and header lookups run at [`Priority::Low`]; body and
/// article downloads at [`Priority::High`]. A priority set on the
/// [`RequestContext`] overrides both.
pub struct MultiConnectionClient<F: ConnectionFactory> {
    pool: ConnectionPool<F>,
    max_retries: u32,
}

impl<F: ConnectionFactory> std::fmt::Debug for MultiConnectionClient<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiConnectionClient")
            .field("pool", &self.pool)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl<F: ConnectionFactory> MultiConnectionClient<F> {
    /// Wrap a pool; `max_retries` fresh attempts follow a failed one
    pub fn new(pool: ConnectionPool<F>, max_retries: u32) -> Self {
        Self { pool, max_retries }
    }

    /// The underlying pool
    pub fn pool(&self) -> &ConnectionPool<F> {
        &self.pool
    }

    /// Sessions that exist
    pub fn live_connections(&self) -> usize {
        self.pool.live_connections()
    }

    /// Sessions waiting in the idle stack
    pub fn idle_connections(&self) -> usize {
        self.pool.idle_connections()
    }

    /// Sessions currently borrowed
    pub fn active_connections(&self) -> usize {
        self.pool.active_connections()
    }

    /// Capacity not currently borrowed
    pub fn available_connections(&self) -> usize {
        self.pool.available_connections()
    }

    async fn execute<T, Op>(
        &self,
        command: &'static str,
        priority: Priority,
        ctx: &RequestContext,
        mut on_ready: Option<OnConnectionReady>,
        mut op: Op,
    ) -> Result<T>
    where
        T: Send,
        Op: FnMut(&mut F::Connection) -> BoxFuture<'_, Result<T>> + Send,
    {
        let priority = ctx.priority_or(priority);
        let mut attempt = 0u32;

        loop {
            ctx.check_cancelled()?;

            let failure = match self.pool.acquire(priority, ctx).await {
                Ok(mut lock) => {
                    // Destroyed on drop unless the operation ends with a
                    // clean answer, so a future dropped mid-command never
                    // pools a half-read session
                    lock.replace();
                    let result = ctx.run(op(&mut *lock)).await;
                    match result {
                        Ok(value) => {
                            lock.keep();
                            lock.release();
                            if let Some(notify) = on_ready.take() {
                                notify();
                            }
                            return Ok(value);
                        }
                        // The session answered cleanly; keep it
                        Err(e) if e.is_article_not_found() => {
                            lock.keep();
                            return Err(e);
                        }
                        Err(e) => {
                            debug!(
                                "[{}] {} failed, replacing connection: {}",
                                self.pool.name(),
                                command,
                                e
                            );
                            e
                        }
                    }
                }
                Err(e) => e,
            };

            if !failure.is_retryable() || attempt >= self.max_retries {
                return Err(failure);
            }
            attempt += 1;
            warn!(
                "[{}] {} failed ({}), retry {}/{}",
                self.pool.name(),
                command,
                failure,
                attempt,
                self.max_retries
            );
        }
    }
}

#[async_trait]
impl<F: ConnectionFactory> NntpClient for MultiConnectionClient<F> {
    async fn stat(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleStat> {
        let id = segment_id.to_string();
        self.execute("STAT", Priority::Low, ctx, None, move |conn| {
            let id = id.clone();
            Box::pin(async move { conn.stat(&id).await })
        })
        .await
    }

    async fn head(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleHeaders> {
        let id = segment_id.to_string();
        self.execute("HEAD", Priority::Low, ctx, None, move |conn| {
            let id = id.clone();
            Box::pin(async move { conn.head(&id).await })
        })
        .await
    }

    async fn yenc_header(&self, segment_id: &str, ctx: &RequestContext) -> Result<YencHeader> {
        let id = segment_id.to_string();
        self.execute("BODY (header)", Priority::Low, ctx, None, move |conn| {
            let id = id.clone();
            Box::pin(async move { conn.yenc_header(&id).await })
        })
        .await
    }

    async fn decoded_body_streaming(
        &self,
        segment_id: &str,
        ctx: &RequestContext,
        on_ready: Option<OnConnectionReady>,
    ) -> Result<DecodedSegment> {
        let id = segment_id.to_string();
        self.execute("BODY", Priority::High, ctx, on_ready, move |conn| {
            let id = id.clone();
            Box::pin(async move {
                let body = conn.body(&id).await?;
                DecodedSegment::from_body(&id, &body)
            })
        })
        .await
    }

    async fn decoded_article(&self, segment_id: &str, ctx: &RequestContext) -> Result<DecodedArticle> {
        let id = segment_id.to_string();
        self.execute("ARTICLE", Priority::High, ctx, None, move |conn| {
            let id = id.clone();
            Box::pin(async move {
                let article = conn.article(&id).await?;
                DecodedArticle::from_article(&id, &article)
            })
        })
        .await
    }

    async fn date(&self, ctx: &RequestContext) -> Result<DateTime<Utc>> {
        self.execute("DATE", Priority::Low, ctx, None, |conn| {
            Box::pin(async move { conn.date().await })
        })
        .await
    }
}

#[async_trait]
impl<F: ConnectionFactory> ProviderClient for MultiConnectionClient<F> {
    fn snapshot(&self) -> PoolSnapshot {
        self.pool.snapshot()
    }

    fn available_connections(&self) -> usize {
        self.pool.available_connections()
    }

    async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
