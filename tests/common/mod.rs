//! In-memory providers shared by the integration tests
//!
//! A [`MockProvider`] holds raw yEnc bodies keyed by segment id and hands
//! out [`MockConnection`]s through [`MockFactory`]. Failures can be queued
//! to simulate flaky sessions.
//!
//! [`WireFactory`] goes one level lower: real [`NntpConnection`]s talking to
//! a scripted server over in-memory pipes, for tests that care about what is
//! left on the wire.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nntp_stream::yenc::{self, PartSpec, YencHeader};
use nntp_stream::{
    ArticleConnection, ArticleHeaders, ArticleStat, ConnectionFactory, FactoryBuilder, NntpConnection,
    NntpError, ProviderConfig, Result,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// Route crate logs to the test output; `RUST_LOG=nntp_stream=trace` shows wire traffic
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Split `data` into yEnc bodies named `{prefix}{n}`
pub fn encode_file(prefix: &str, data: &[u8], segment_size: usize) -> (Vec<String>, Vec<Vec<u8>>) {
    let chunks: Vec<&[u8]> = data.chunks(segment_size).collect();
    let total = chunks.len() as u32;
    let mut ids = Vec::new();
    let mut bodies = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let part = PartSpec {
            number: i as u32 + 1,
            total,
            offset: (i * segment_size) as u64,
            file_size: data.len() as u64,
        };
        ids.push(format!("{}{}", prefix, i));
        bodies.push(yenc::encode(chunk, "file.bin", 128, Some(part)).unwrap());
    }
    (ids, bodies)
}

/// Bytes 0, 1, ..., 250, 0, 1, ... of the given length
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[derive(Default)]
pub struct MockProvider {
    articles: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<VecDeque<NntpError>>,
    pub connects: AtomicUsize,
    pub commands: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        init_tracing();
        Arc::new(Self::default())
    }

    pub fn insert(&self, id: &str, body: Vec<u8>) {
        self.articles.lock().unwrap().insert(id.to_string(), body);
    }

    pub fn insert_file(&self, ids: &[String], bodies: &[Vec<u8>]) {
        for (id, body) in ids.iter().zip(bodies) {
            self.insert(id, body.clone());
        }
    }

    /// Make the next command fail with `error`
    pub fn fail_next(&self, error: NntpError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    fn lookup(&self, id: &str) -> Result<Vec<u8>> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.articles
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| NntpError::NoSuchArticle(id.to_string()))
    }
}

pub struct MockConnection {
    provider: Arc<MockProvider>,
    broken: bool,
}

impl MockConnection {
    fn run(&mut self, id: &str) -> Result<Vec<u8>> {
        let result = self.provider.lookup(id);
        if let Err(e) = &result
            && !e.is_article_not_found()
        {
            self.broken = true;
        }
        result
    }
}

#[async_trait]
impl ArticleConnection for MockConnection {
    async fn stat(&mut self, segment_id: &str) -> Result<ArticleStat> {
        match self.run(segment_id) {
            Ok(_) => Ok(ArticleStat::Found {
                number: 0,
                message_id: format!("<{}>", segment_id),
            }),
            Err(e) if e.is_article_not_found() => Ok(ArticleStat::Missing),
            Err(e) => Err(e),
        }
    }

    async fn head(&mut self, segment_id: &str) -> Result<ArticleHeaders> {
        self.run(segment_id)?;
        Ok(ArticleHeaders::default())
    }

    async fn body(&mut self, segment_id: &str) -> Result<Vec<u8>> {
        self.run(segment_id)
    }

    async fn article(&mut self, segment_id: &str) -> Result<Vec<u8>> {
        let body = self.run(segment_id)?;
        let mut article = format!("Message-ID: <{}>\r\n\r\n", segment_id).into_bytes();
        article.extend_from_slice(&body);
        Ok(article)
    }

    async fn yenc_header(&mut self, segment_id: &str) -> Result<YencHeader> {
        yenc::parse_header(&self.run(segment_id)?)
    }

    async fn date(&mut self) -> Result<DateTime<Utc>> {
        Ok(Utc::now())
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

#[derive(Clone)]
pub struct MockFactory {
    provider: Arc<MockProvider>,
}

impl MockFactory {
    pub fn new(provider: Arc<MockProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection> {
        self.provider.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            provider: self.provider.clone(),
            broken: false,
        })
    }
}

/// Providers addressed by host name, for [`UsenetStreamingClient::with_factory`]
///
/// [`UsenetStreamingClient::with_factory`]: nntp_stream::UsenetStreamingClient::with_factory
#[derive(Default, Clone)]
pub struct MockNetwork {
    hosts: Arc<Mutex<HashMap<String, Arc<MockProvider>>>>,
    pub factories_built: Arc<AtomicUsize>,
}

impl MockNetwork {
    pub fn new() -> Self {
        init_tracing();
        Self::default()
    }

    /// The provider answering for `host`, created on first use
    pub fn host(&self, host: &str) -> Arc<MockProvider> {
        self.hosts
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_insert_with(MockProvider::new)
            .clone()
    }

    pub fn factory_builder(&self) -> FactoryBuilder<MockFactory> {
        let network = self.clone();
        Arc::new(move |config: Arc<ProviderConfig>| {
            network.factories_built.fetch_add(1, Ordering::SeqCst);
            MockFactory::new(network.host(&config.host))
        })
    }

    pub fn factories_built(&self) -> usize {
        self.factories_built.load(Ordering::SeqCst)
    }
}

/// Plain-text provider configuration without credentials
pub fn provider(host: &str, max_connections: usize) -> ProviderConfig {
    ProviderConfig::plain(host, "", "").with_max_connections(max_connections)
}

/// What the scripted server writes for one command
///
/// `head` goes out at once; `tail` follows after `delay`.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub head: Vec<u8>,
    pub delay: Duration,
    pub tail: Vec<u8>,
}

impl Reply {
    /// Whole reply sent immediately
    pub fn now(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            head: bytes.into(),
            ..Self::default()
        }
    }

    /// `head` now, `tail` after `delay`
    pub fn split(head: impl Into<Vec<u8>>, delay: Duration, tail: impl Into<Vec<u8>>) -> Self {
        Self {
            head: head.into(),
            delay,
            tail: tail.into(),
        }
    }
}

/// `222` response carrying `body` with dot-stuffing and terminator
pub fn body_response(id: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!("222 0 <{}>\r\n", id).into_bytes();
    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if line.starts_with(b".") {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

type Script = dyn Fn(&str) -> Reply + Send + Sync;

/// Opens [`NntpConnection`]s to a scripted in-memory server
///
/// The script maps each command line (without CRLF) to a [`Reply`]. Every
/// session gets its own server task, which answers commands in order.
#[derive(Clone)]
pub struct WireFactory {
    script: Arc<Script>,
    connects: Arc<AtomicUsize>,
}

impl WireFactory {
    pub fn new(script: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        init_tracing();
        Self {
            script: Arc::new(script),
            connects: Arc::default(),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for WireFactory {
    type Connection = NntpConnection;

    async fn connect(&self) -> Result<NntpConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(server, self.script.clone()));
        NntpConnection::from_stream(Box::new(client), Arc::new(provider("wire.example", 4))).await
    }
}

async fn serve(stream: DuplexStream, script: Arc<Script>) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    if write.write_all(b"200 scripted server ready\r\n").await.is_err() {
        return;
    }
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = script(line.trim_end());
        if write.write_all(&reply.head).await.is_err() {
            return;
        }
        if !reply.tail.is_empty() {
            tokio::time::sleep(reply.delay).await;
            if write.write_all(&reply.tail).await.is_err() {
                return;
            }
        }
    }
}
