//! Decoded article bodies cached on local disk
//!
//! Each body is stored as a yEnc file named after the SHA-256 of its segment
//! id, inside a per-instance directory under the system temp directory. The
//! directory is deleted by [`ArticleCachingClient::shutdown`] (or on drop as
//! a fallback).

use super::{DecodedArticle, DecodedSegment, NntpClient, OnConnectionReady};
use crate::commands::{ArticleHeaders, ArticleStat};
use crate::context::RequestContext;
use crate::error::Result;
use crate::yenc::{self, PartSpec, YencHeader};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Line length used when re-encoding bodies for the cache
const CACHE_LINE_LENGTH: usize = 128;

/// Serves repeated body downloads from disk
///
/// Only one fetch-or-read per segment id runs at a time, so concurrent
/// readers of the same segment trigger a single download.
#[derive(Debug)]
pub struct ArticleCachingClient<C> {
    inner: C,
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<C: NntpClient> ArticleCachingClient<C> {
    /// Cache in a fresh `nntp-stream-<uuid>` directory under the temp dir
    pub fn new(inner: C) -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("nntp-stream-{}", Uuid::new_v4()));
        Self::with_directory(inner, dir)
    }

    /// Cache in `dir`, creating it if needed
    ///
    /// The directory is removed on shutdown.
    pub fn with_directory(inner: C, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        debug!("Article cache at {}", dir.display());
        Ok(Self {
            inner,
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// The wrapped client
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Cache directory
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Delete the cache directory and everything in it
    pub async fn shutdown(&self) {
        log_removal(&self.dir, tokio::fs::remove_dir_all(&self.dir).await);
    }

    /// Whether a body for `segment_id` is on disk
    pub async fn is_cached(&self, segment_id: &str) -> bool {
        tokio::fs::try_exists(self.path_for(segment_id))
            .await
            .unwrap_or(false)
    }

    fn path_for(&self, segment_id: &str) -> PathBuf {
        let digest = Sha256::digest(segment_id.as_bytes());
        self.dir.join(format!("{:x}", digest))
    }

    fn segment_lock(&self, segment_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(segment_id.to_string())
            .or_default()
            .clone()
    }

    fn release_segment_lock(&self, segment_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(segment_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(segment_id);
        }
    }

    async fn read_cached(&self, segment_id: &str) -> Option<DecodedSegment> {
        let bytes = tokio::fs::read(self.path_for(segment_id)).await.ok()?;
        match DecodedSegment::from_body(segment_id, &bytes) {
            Ok(segment) => Some(segment),
            Err(e) => {
                warn!("Discarding unreadable cache entry for {}: {}", segment_id, e);
                None
            }
        }
    }

    async fn write_cached(&self, segment: &DecodedSegment) -> Result<()> {
        let header = &segment.header;
        let part = header.part_number.map(|number| PartSpec {
            number,
            total: header.total_parts.unwrap_or(number),
            offset: header.part_offset,
            file_size: header.file_size,
        });
        let encoded = yenc::encode(&segment.data, &header.file_name, CACHE_LINE_LENGTH, part)?;

        let path = self.path_for(&segment.segment_id);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &encoded).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn fetch_or_read(
        &self,
        segment_id: &str,
        ctx: &RequestContext,
        on_ready: Option<OnConnectionReady>,
    ) -> Result<DecodedSegment> {
        if let Some(segment) = self.read_cached(segment_id).await {
            trace!("Article cache hit for {}", segment_id);
            if let Some(notify) = on_ready {
                notify();
            }
            return Ok(segment);
        }

        let segment = self
            .inner
            .decoded_body_streaming(segment_id, ctx, on_ready)
            .await?;
        if let Err(e) = self.write_cached(&segment).await {
            warn!("Failed to cache {}: {}", segment_id, e);
        }
        Ok(segment)
    }
}

fn log_removal(dir: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!("Removed article cache {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove article cache {}: {}", dir.display(), e),
    }
}

impl<C> Drop for ArticleCachingClient<C> {
    fn drop(&mut self) {
        // Only reached with files left behind when shutdown() was skipped
        if self.dir.exists() {
            log_removal(&self.dir, std::fs::remove_dir_all(&self.dir));
        }
    }
}

#[async_trait]
impl<C: NntpClient> NntpClient for ArticleCachingClient<C> {
    async fn stat(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleStat> {
        self.inner.stat(segment_id, ctx).await
    }

    async fn head(&self, segment_id: &str, ctx: &RequestContext) -> Result<ArticleHeaders> {
        self.inner.head(segment_id, ctx).await
    }

    async fn yenc_header(&self, segment_id: &str, ctx: &RequestContext) -> Result<YencHeader> {
        if let Ok(bytes) = tokio::fs::read(self.path_for(segment_id)).await
            && let Ok(header) = yenc::parse_header(&bytes)
        {
            return Ok(header);
        }
        self.inner.yenc_header(segment_id, ctx).await
    }

    async fn decoded_body_streaming(
        &self,
        segment_id: &str,
        ctx: &RequestContext,
        on_ready: Option<OnConnectionReady>,
    ) -> Result<DecodedSegment> {
        let lock = self.segment_lock(segment_id);
        let result = match ctx.run(async { Ok(lock.lock().await) }).await {
            Ok(_guard) => self.fetch_or_read(segment_id, ctx, on_ready).await,
            Err(e) => Err(e),
        };
        self.release_segment_lock(segment_id, lock);
        result
    }

    async fn decoded_article(&self, segment_id: &str, ctx: &RequestContext) -> Result<DecodedArticle> {
        self.inner.decoded_article(segment_id, ctx).await
    }

    async fn date(&self, ctx: &RequestContext) -> Result<DateTime<Utc>> {
        self.inner.date(ctx).await
    }
}
