//! Low-level I/O for one NNTP session
//!
//! Command transmission, single-line responses and dot-terminated multi-line
//! responses read as raw bytes. Any response we cannot parse marks the
//! session broken so the pool never hands it out again.

use super::NntpConnection;
use crate::commands;
use crate::error::{NntpError, Result};
use crate::response::{NntpBinaryResponse, NntpResponse};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::trace;

const SINGLE_LINE_TIMEOUT: Duration = Duration::from_secs(60);
pub(super) const MULTILINE_TIMEOUT: Duration = Duration::from_secs(180);
const BINARY_DATA_INITIAL_CAPACITY: usize = 1024 * 1024;

/// Outcome of reading one line of a multi-line block
pub(super) enum BlockLine {
    /// Payload line, dot-unstuffed, without its line terminator
    Data(Vec<u8>),
    /// The lone "." terminator
    End,
}

/// Strip the line terminator and NNTP dot-stuffing from a raw line
fn unstuff(mut line: Vec<u8>) -> BlockLine {
    if line.ends_with(b"\r\n") {
        line.truncate(line.len() - 2);
    } else if line.ends_with(b"\n") {
        line.truncate(line.len() - 1);
    }

    if line == b"." {
        return BlockLine::End;
    }
    if line.starts_with(b"..") {
        line.remove(0);
    }
    BlockLine::Data(line)
}

impl NntpConnection {
    /// Send a command to the server
    pub(super) async fn send_command(&mut self, command: &str) -> Result<()> {
        if command.starts_with("AUTHINFO PASS") {
            trace!("Sending command: AUTHINFO PASS ****");
        } else {
            trace!("Sending command: {}", command.trim());
        }
        self.awaiting_response = true;
        let result = async {
            let writer = self.stream.get_mut();
            writer.write_all(command.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            self.mark_broken();
            return Err(NntpError::Io(e));
        }
        Ok(())
    }

    /// Read a single-line response
    pub(super) async fn read_response(&mut self) -> Result<NntpResponse> {
        let result = timeout(SINGLE_LINE_TIMEOUT, self.read_status_line())
            .await
            .map_err(|_| NntpError::Timeout)
            .and_then(|r| r);
        self.settle(result)
    }

    async fn read_status_line(&mut self) -> Result<NntpResponse> {
        let mut line_bytes = Vec::with_capacity(256);
        self.stream.read_until(b'\n', &mut line_bytes).await?;

        if line_bytes.is_empty() {
            return Err(NntpError::ConnectionClosed);
        }

        let line = String::from_utf8_lossy(&line_bytes);
        let line = line.trim_end();
        trace!("Received: {}", line);

        commands::parse_single_response(line)
    }

    /// Read the next line of a multi-line block
    pub(super) async fn read_block_line(&mut self) -> Result<BlockLine> {
        let mut line_bytes = Vec::with_capacity(512);
        self.stream.read_until(b'\n', &mut line_bytes).await?;

        if line_bytes.is_empty() {
            return Err(NntpError::ConnectionClosed);
        }
        Ok(unstuff(line_bytes))
    }

    /// Skip the remainder of a multi-line block
    pub(super) async fn drain_block(&mut self) -> Result<()> {
        let result = timeout(MULTILINE_TIMEOUT, async {
            loop {
                if let BlockLine::End = self.read_block_line().await? {
                    return Ok(());
                }
            }
        })
        .await
        .map_err(|_| NntpError::Timeout)
        .and_then(|r| r);
        self.settle(result)
    }

    /// Read a multi-line response as raw bytes
    ///
    /// The payload keeps CRLF between lines so the yEnc decoder and the
    /// article splitter see the original line structure. Error responses
    /// (4xx/5xx) carry no payload.
    pub(super) async fn read_multiline_response_binary(
        &mut self,
    ) -> Result<NntpBinaryResponse> {
        let result = timeout(MULTILINE_TIMEOUT, async {
            let status = self.read_status_line().await?;
            if status.code >= 400 {
                return Ok(NntpBinaryResponse {
                    code: status.code,
                    message: status.message,
                    data: Vec::new(),
                });
            }

            let mut data = Vec::with_capacity(BINARY_DATA_INITIAL_CAPACITY);
            while let BlockLine::Data(line) = self.read_block_line().await? {
                data.extend_from_slice(&line);
                data.extend_from_slice(b"\r\n");
            }

            Ok(NntpBinaryResponse {
                code: status.code,
                message: status.message,
                data,
            })
        })
        .await
        .map_err(|_| NntpError::Timeout)
        .and_then(|r| r);
        self.settle(result)
    }

    /// Read a multi-line text response (HEAD)
    pub(super) async fn read_multiline_response(&mut self) -> Result<NntpResponse> {
        let binary = self.read_multiline_response_binary().await?;
        let lines = if binary.data.is_empty() {
            Vec::new()
        } else {
            String::from_utf8_lossy(&binary.data)
                .lines()
                .map(str::to_string)
                .collect()
        };
        Ok(NntpResponse {
            code: binary.code,
            message: binary.message,
            lines,
        })
    }

    /// Close out a read that ends the current response
    ///
    /// Only a complete read clears the pending-response flag; a failed one
    /// also marks the session broken.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_ok() {
            self.awaiting_response = false;
        }
        self.track_failure(result)
    }

    /// Anything but a clean protocol answer leaves the session out of sync
    fn track_failure<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && matches!(
                e,
                NntpError::InvalidResponse(_)
                    | NntpError::Timeout
                    | NntpError::Io(_)
                    | NntpError::ConnectionClosed
            )
        {
            self.mark_broken();
        }
        result
    }

    /// Mark the session broken after a failed step and pass the error on
    pub(super) fn fail<T>(&mut self, err: NntpError) -> Result<T> {
        self.track_failure(Err(err))
    }
}
