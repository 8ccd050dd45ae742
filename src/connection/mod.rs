//! A single physical NNTP session
//!
//! [`NntpConnection`] owns one TCP (optionally TLS) session and issues the
//! retrieval commands the streaming stack needs. Commands run strictly one at
//! a time: every operation takes `&mut self`, so the session can only be
//! driven by whoever currently owns it.
//!
//! The pool is generic over [`ConnectionFactory`] and [`ArticleConnection`],
//! which is how tests substitute scripted connections.

mod articles;
mod auth;
mod io;
mod state;
mod transport;

use crate::commands::{ArticleHeaders, ArticleStat};
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::yenc::YencHeader;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::debug;

pub use state::ConnectionState;

/// Byte stream an [`NntpConnection`] can run over
///
/// Blanket-implemented for plain TCP, TLS and in-memory duplex pipes.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Async NNTP session over TCP or TLS
///
/// # Example
///
/// ```no_run
/// use nntp_stream::{NntpConnection, ProviderConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> nntp_stream::Result<()> {
/// let config = ProviderConfig::tls("news.example.com", "user", "pass");
/// let mut conn = NntpConnection::connect(Arc::new(config)).await?;
/// conn.authenticate().await?;
///
/// let stat = conn.stat("part1of10@example").await?;
/// println!("exists: {}", stat.exists());
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct NntpConnection {
    stream: BufReader<Box<dyn AsyncStream>>,
    state: ConnectionState,
    config: Arc<ProviderConfig>,
    /// Set when the server sent something we could not parse; the session
    /// can no longer be trusted to be in sync
    is_broken: bool,
    /// A command was sent and its response has not been read in full
    ///
    /// Stays set when the operation is dropped halfway, so an abandoned
    /// session is never handed to the next borrower with a stale reply
    /// still on the socket.
    awaiting_response: bool,
}

impl std::fmt::Debug for NntpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NntpConnection")
            .field("state", &self.state)
            .field("is_broken", &self.is_broken)
            .field("awaiting_response", &self.awaiting_response)
            .finish_non_exhaustive()
    }
}

impl NntpConnection {
    /// Check if this connection is broken and should be discarded
    ///
    /// True after a protocol or transport failure, and while the response to
    /// the last command is still unread.
    pub fn is_broken(&self) -> bool {
        self.is_broken || self.awaiting_response
    }

    fn mark_broken(&mut self) {
        self.is_broken = true;
        self.state = ConnectionState::Faulted;
    }

    /// Current session state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Provider this session belongs to
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

impl Drop for NntpConnection {
    fn drop(&mut self) {
        debug!("NntpConnection to {} dropped", self.config.host);
    }
}

/// Retrieval operations on one exclusively-owned session
///
/// Errors follow the crate taxonomy: a 430/423 answer to HEAD, BODY or
/// ARTICLE is [`NntpError::NoSuchArticle`](crate::NntpError::NoSuchArticle),
/// while STAT reports a missing article as [`ArticleStat::Missing`].
#[async_trait]
pub trait ArticleConnection: Send + 'static {
    /// STAT a segment
    async fn stat(&mut self, segment_id: &str) -> Result<ArticleStat>;

    /// Fetch the header block of a segment
    async fn head(&mut self, segment_id: &str) -> Result<ArticleHeaders>;

    /// Fetch the raw (still yEnc encoded) body of a segment
    async fn body(&mut self, segment_id: &str) -> Result<Vec<u8>>;

    /// Fetch the raw article: headers, blank line, encoded body
    async fn article(&mut self, segment_id: &str) -> Result<Vec<u8>>;

    /// Read just the yEnc header of a segment's body
    async fn yenc_header(&mut self, segment_id: &str) -> Result<YencHeader>;

    /// Server clock
    async fn date(&mut self) -> Result<DateTime<Utc>>;

    /// Whether the session lost protocol sync and must not be reused
    ///
    /// Must also be true while a command's response is only partly read,
    /// which is the state a session is left in when the operation driving
    /// it is dropped.
    fn is_broken(&self) -> bool;

    /// Orderly shutdown; errors are ignored
    async fn close(&mut self) {}
}

/// Creates sessions for one provider
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Session type produced
    type Connection: ArticleConnection;

    /// Open, greet and authenticate a new session
    async fn connect(&self) -> Result<Self::Connection>;
}

/// Factory for real network sessions
#[derive(Debug, Clone)]
pub struct TcpConnectionFactory {
    config: Arc<ProviderConfig>,
}

impl TcpConnectionFactory {
    /// Factory for the given provider
    pub fn new(config: Arc<ProviderConfig>) -> Self {
        Self { config }
    }

    /// Provider this factory connects to
    pub fn config(&self) -> &Arc<ProviderConfig> {
        &self.config
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    type Connection = NntpConnection;

    async fn connect(&self) -> Result<NntpConnection> {
        let mut conn = NntpConnection::connect(self.config.clone()).await?;
        if self.config.has_credentials() {
            conn.authenticate().await?;
        }
        Ok(conn)
    }
}
