//! Article retrieval commands (RFC 3977 §6.2) and DATE (§7.1)

use super::io::{BlockLine, MULTILINE_TIMEOUT};
use super::{ArticleConnection, NntpConnection};
use crate::commands::{self, ArticleHeaders, ArticleStat};
use crate::error::{NntpError, Result};
use crate::yenc::{self, YencHeader};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{debug, trace};

use super::state::ConnectionState;

/// Lines we are willing to skip looking for `=ybegin` before giving up
const MAX_YENC_PREAMBLE_LINES: usize = 16;

impl NntpConnection {
    /// Check whether a segment exists (STAT)
    ///
    /// A missing article is reported as [`ArticleStat::Missing`], not as an
    /// error.
    pub async fn stat(&mut self, segment_id: &str) -> Result<ArticleStat> {
        trace!("STAT {}", segment_id);
        let cmd = commands::stat(&commands::message_id(segment_id));
        self.send_command(&cmd).await?;
        let response = self.read_response().await?;
        commands::parse_stat_response(response)
    }

    /// Fetch the headers of a segment (HEAD)
    ///
    /// # Errors
    ///
    /// - [`NntpError::NoSuchArticle`] - the provider does not have it
    /// - [`NntpError::Protocol`] - unexpected response code
    pub async fn head(&mut self, segment_id: &str) -> Result<ArticleHeaders> {
        trace!("HEAD {}", segment_id);
        let cmd = commands::head(&commands::message_id(segment_id));
        self.send_command(&cmd).await?;
        let response = self.read_multiline_response().await?.into_result(segment_id)?;
        Ok(commands::parse_headers(response.lines.iter().map(String::as_str)))
    }

    /// Fetch the encoded body of a segment (BODY)
    ///
    /// Returns the dot-unstuffed payload with CRLF line endings.
    pub async fn body(&mut self, segment_id: &str) -> Result<Vec<u8>> {
        trace!("BODY {}", segment_id);
        let cmd = commands::body(&commands::message_id(segment_id));
        self.fetch_binary(&cmd, segment_id).await
    }

    /// Fetch the whole article (ARTICLE)
    pub async fn article(&mut self, segment_id: &str) -> Result<Vec<u8>> {
        trace!("ARTICLE {}", segment_id);
        let cmd = commands::article(&commands::message_id(segment_id));
        self.fetch_binary(&cmd, segment_id).await
    }

    async fn fetch_binary(&mut self, cmd: &str, segment_id: &str) -> Result<Vec<u8>> {
        self.send_command(cmd).await?;
        let data = self
            .read_multiline_response_binary()
            .await?
            .into_data(segment_id)?;
        debug!("Fetched {} bytes for {}", data.len(), segment_id);
        Ok(data)
    }

    /// Read only the yEnc header of a segment
    ///
    /// Issues BODY, parses `=ybegin` and `=ypart`, then discards the rest of
    /// the body so the session stays usable.
    pub async fn yenc_header(&mut self, segment_id: &str) -> Result<YencHeader> {
        trace!("BODY {} (header only)", segment_id);
        let cmd = commands::body(&commands::message_id(segment_id));
        self.send_command(&cmd).await?;

        self.read_response().await?.into_result(segment_id)?;
        // The status line was accepted, the body is still to come
        self.awaiting_response = true;

        let scanned = timeout(MULTILINE_TIMEOUT, self.scan_yenc_header()).await;
        let (header_bytes, ended) = match scanned {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => return self.fail(e),
            Err(_) => return self.fail(NntpError::Timeout),
        };

        if ended {
            self.awaiting_response = false;
        } else {
            self.drain_block().await?;
        }
        yenc::parse_header(&header_bytes)
    }

    /// Collect body lines up to and including the line after `=ybegin`
    ///
    /// Returns the collected bytes and whether the terminator was already
    /// consumed.
    async fn scan_yenc_header(&mut self) -> Result<(Vec<u8>, bool)> {
        let mut collected = Vec::with_capacity(512);
        let mut seen_begin = false;

        for _ in 0..=MAX_YENC_PREAMBLE_LINES {
            let line = match self.read_block_line().await? {
                BlockLine::Data(line) => line,
                BlockLine::End => return Ok((collected, true)),
            };
            let is_begin = line.starts_with(b"=ybegin ");
            collected.extend_from_slice(&line);
            collected.extend_from_slice(b"\r\n");

            if seen_begin {
                // This was the line after =ybegin: =ypart or the first data line
                return Ok((collected, false));
            }
            seen_begin = is_begin;
        }
        Ok((collected, false))
    }

    /// Server's current time (DATE)
    pub async fn date(&mut self) -> Result<DateTime<Utc>> {
        self.send_command(commands::date()).await?;
        let response = self.read_response().await?;
        commands::parse_date_response(response)
    }

    /// Send QUIT and mark the session closed
    ///
    /// Best effort: the reply is awaited but its content ignored.
    pub async fn quit(&mut self) -> Result<()> {
        if matches!(self.state, ConnectionState::Closed) {
            return Ok(());
        }
        self.send_command(commands::quit()).await?;
        let response = self.read_response().await;
        self.state = ConnectionState::Closed;
        response.map(|_| ())
    }
}

#[async_trait]
impl ArticleConnection for NntpConnection {
    async fn stat(&mut self, segment_id: &str) -> Result<ArticleStat> {
        NntpConnection::stat(self, segment_id).await
    }

    async fn head(&mut self, segment_id: &str) -> Result<ArticleHeaders> {
        NntpConnection::head(self, segment_id).await
    }

    async fn body(&mut self, segment_id: &str) -> Result<Vec<u8>> {
        NntpConnection::body(self, segment_id).await
    }

    async fn article(&mut self, segment_id: &str) -> Result<Vec<u8>> {
        NntpConnection::article(self, segment_id).await
    }

    async fn yenc_header(&mut self, segment_id: &str) -> Result<YencHeader> {
        NntpConnection::yenc_header(self, segment_id).await
    }

    async fn date(&mut self) -> Result<DateTime<Utc>> {
        NntpConnection::date(self).await
    }

    fn is_broken(&self) -> bool {
        NntpConnection::is_broken(self)
    }

    async fn close(&mut self) {
        if let Err(e) = self.quit().await {
            debug!("QUIT failed: {}", e);
        }
    }
}
