//! Article availability checks
//!
//! Both checks use STAT only, so no article data is transferred. A missing
//! article answers `false` / `Some(id)`; anything else that goes wrong
//! (network failure, cancellation) is returned as an error, so callers can
//! tell "data is gone" from "could not verify right now".

use crate::client::NntpClient;
use crate::context::{RequestContext, UsageContext};
use crate::error::Result;
use futures::stream::{self, StreamExt};
use rand::seq::index;
use std::sync::Arc;
use tracing::{debug, info};

/// Concurrent STAT requests per check
pub const DEFAULT_HEALTH_CONCURRENCY: usize = 10;

/// Verifies that the segments of a file are still on the servers
pub struct HealthChecker {
    client: Arc<dyn NntpClient>,
    concurrency: usize,
}

impl HealthChecker {
    /// Checker issuing up to [`DEFAULT_HEALTH_CONCURRENCY`] requests at once
    pub fn new(client: Arc<dyn NntpClient>) -> Self {
        Self {
            client,
            concurrency: DEFAULT_HEALTH_CONCURRENCY,
        }
    }

    /// Change the number of concurrent requests
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Whether a random sample of the segments is mostly present
    ///
    /// `sample_percent` of the segments (at least one) are picked at random
    /// and checked with STAT. The file counts as healthy when at least
    /// `healthy_threshold_percent` of the sample exists. Checking stops as
    /// soon as enough segments are missing that the threshold can no longer
    /// be met.
    pub async fn check_segments_healthy(
        &self,
        segment_ids: &[String],
        sample_percent: u8,
        healthy_threshold_percent: u8,
        ctx: &RequestContext,
    ) -> Result<bool> {
        if segment_ids.is_empty() {
            return Ok(true);
        }
        let total = segment_ids.len();
        let sample_size = percent_of(total, sample_percent.clamp(1, 100)).max(1);
        let required = percent_of(sample_size, healthy_threshold_percent.min(100));
        let allowed_missing = sample_size - required;

        let picked = {
            let mut rng = rand::thread_rng();
            index::sample(&mut rng, total, sample_size).into_vec()
        };
        debug!(
            "health check: {} of {} segments, {} may be missing",
            sample_size, total, allowed_missing
        );

        let ctx = ctx.clone().with_usage(UsageContext::HealthCheck);
        let mut results = stream::iter(picked)
            .map(|i| {
                let ctx = &ctx;
                let id = &segment_ids[i];
                async move { self.client.stat(id, ctx).await.map(|stat| (id, stat.exists())) }
            })
            .buffer_unordered(self.concurrency);

        let mut missing = 0;
        while let Some(result) = results.next().await {
            let (id, exists) = result?;
            if !exists {
                missing += 1;
                debug!("segment {} is missing ({} so far)", id, missing);
                if missing > allowed_missing {
                    info!(
                        "health check failed: {} of {} sampled segments missing",
                        missing, sample_size
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// First segment, in file order, that no provider has
    ///
    /// Every segment is checked; requests run concurrently but results are
    /// considered in order.
    pub async fn find_missing_segment(
        &self,
        segment_ids: &[String],
        ctx: &RequestContext,
    ) -> Result<Option<String>> {
        let ctx = ctx.clone().with_usage(UsageContext::HealthCheck);
        let mut results = stream::iter(segment_ids)
            .map(|id| {
                let ctx = &ctx;
                async move { self.client.stat(id, ctx).await.map(|stat| (id, stat.exists())) }
            })
            .buffered(self.concurrency);

        while let Some(result) = results.next().await {
            let (id, exists) = result?;
            if !exists {
                info!("segment {} is missing", id);
                return Ok(Some(id.clone()));
            }
        }
        Ok(None)
    }
}

/// `percent`% of `count`, rounded up
fn percent_of(count: usize, percent: u8) -> usize {
    (count * percent as usize).div_ceil(100)
}
