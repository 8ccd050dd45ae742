//! In-memory client serving yEnc-encoded segments to stream tests

use crate::client::{DecodedArticle, DecodedSegment, NntpClient, OnConnectionReady};
use crate::commands::{ArticleHeaders, ArticleStat};
use crate::context::RequestContext;
use crate::error::{NntpError, Result};
use crate::yenc::{self, PartSpec, YencHeader};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) fn ids(names: &[&str]) -> Arc<[String]> {
    names.iter().map(|s| s.to_string()).collect()
}

pub(crate) struct Bodies {
    bodies: HashMap<String, Vec<u8>>,
    delays: HashMap<String, Duration>,
    fetched: Mutex<Vec<String>>,
    header_lookups: AtomicUsize,
    stat_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Bodies {
    /// Segments given as `(id, offset, data)`
    pub(crate) fn new(layout: &[(&str, u64, &str)], file_size: u64) -> Self {
        let total = layout.len() as u32;
        let bodies = layout
            .iter()
            .enumerate()
            .map(|(i, (id, offset, data))| {
                let part = PartSpec {
                    number: i as u32 + 1,
                    total,
                    offset: *offset,
                    file_size,
                };
                let body = yenc::encode(data.as_bytes(), "f.bin", 128, Some(part)).unwrap();
                (id.to_string(), body)
            })
            .collect();
        Self::from_map(bodies)
    }

    /// `data` cut into `segment_size` pieces named `seg0`, `seg1`, ...
    pub(crate) fn split(data: &[u8], segment_size: usize) -> (Self, Arc<[String]>) {
        let chunks: Vec<&[u8]> = data.chunks(segment_size).collect();
        let total = chunks.len() as u32;
        let mut names = Vec::new();
        let mut bodies = HashMap::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let part = PartSpec {
                number: i as u32 + 1,
                total,
                offset: (i * segment_size) as u64,
                file_size: data.len() as u64,
            };
            let name = format!("seg{}", i);
            bodies.insert(name.clone(), yenc::encode(chunk, "f.bin", 128, Some(part)).unwrap());
            names.push(name);
        }
        (Self::from_map(bodies), names.into())
    }

    pub(crate) fn from_map(bodies: HashMap<String, Vec<u8>>) -> Self {
        Self {
            bodies,
            delays: HashMap::new(),
            fetched: Mutex::new(Vec::new()),
            header_lookups: AtomicUsize::new(0),
            stat_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make fetches of `id` take `delay`
    pub(crate) fn with_delay(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    pub(crate) fn remove(&mut self, id: &str) {
        self.bodies.remove(id);
    }

    pub(crate) fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub(crate) fn header_lookups(&self) -> usize {
        self.header_lookups.load(Ordering::SeqCst)
    }

    pub(crate) fn stat_calls(&self) -> usize {
        self.stat_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn body(&self, id: &str) -> Result<&Vec<u8>> {
        self.bodies
            .get(id)
            .ok_or_else(|| NntpError::NoSuchArticle(id.to_string()))
    }
}

#[async_trait]
impl NntpClient for Bodies {
    async fn stat(&self, id: &str, _ctx: &RequestContext) -> Result<ArticleStat> {
        self.stat_calls.fetch_add(1, Ordering::SeqCst);
        Ok(match self.bodies.contains_key(id) {
            true => ArticleStat::Found {
                number: 0,
                message_id: id.to_string(),
            },
            false => ArticleStat::Missing,
        })
    }

    async fn head(&self, _id: &str, _ctx: &RequestContext) -> Result<ArticleHeaders> {
        Ok(ArticleHeaders::default())
    }

    async fn yenc_header(&self, id: &str, _ctx: &RequestContext) -> Result<YencHeader> {
        self.header_lookups.fetch_add(1, Ordering::SeqCst);
        yenc::parse_header(self.body(id)?)
    }

    async fn decoded_body_streaming(
        &self,
        id: &str,
        _ctx: &RequestContext,
        on_ready: Option<OnConnectionReady>,
    ) -> Result<DecodedSegment> {
        self.fetched.lock().unwrap().push(id.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(id) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let segment = DecodedSegment::from_body(id, self.body(id)?)?;
        if let Some(ready) = on_ready {
            ready();
        }
        Ok(segment)
    }

    async fn decoded_article(&self, _id: &str, _ctx: &RequestContext) -> Result<DecodedArticle> {
        Err(NntpError::Other("unused".into()))
    }

    async fn date(&self, _ctx: &RequestContext) -> Result<DateTime<Utc>> {
        Ok(Utc::now())
    }
}
