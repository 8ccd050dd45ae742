//! Per-request context threaded through every client call
//!
//! Cancellation, the usage tag, the reserved-connection count and an optional
//! priority override travel together as one explicit value instead of being
//! hung off a cancellation primitive.

use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::error::{NntpError, Result};

/// Admission priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Interactive streaming reads
    High,
    /// Bulk queue and health-check work
    Low,
}

/// Descriptive tag of what a borrowed connection is being used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UsageContext {
    /// Queue processing
    Queue,
    /// Interactive streaming
    Streaming,
    /// Integrity checks
    HealthCheck,
    /// Repair work
    Repair,
    /// Read-ahead for buffered streams
    BufferedStreaming,
}

impl fmt::Display for UsageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UsageContext::Queue => "queue",
            UsageContext::Streaming => "streaming",
            UsageContext::HealthCheck => "health-check",
            UsageContext::Repair => "repair",
            UsageContext::BufferedStreaming => "buffered-streaming",
        };
        f.write_str(name)
    }
}

/// Explicit request context
///
/// # Example
///
/// ```
/// use nntp_stream::{RequestContext, UsageContext};
///
/// let ctx = RequestContext::new()
///     .with_usage(UsageContext::HealthCheck)
///     .with_reserved_connections(2);
/// assert_eq!(ctx.reserved_connections(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancel: CancellationToken,
    usage: UsageContext,
    reserved_connections: usize,
    priority: Option<Priority>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// New streaming context with its own cancellation token
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// New streaming context bound to an existing token
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            usage: UsageContext::Streaming,
            reserved_connections: 0,
            priority: None,
        }
    }

    /// Set the usage tag
    #[must_use]
    pub fn with_usage(mut self, usage: UsageContext) -> Self {
        self.usage = usage;
        self
    }

    /// Require this many slots to stay free after our acquisition
    #[must_use]
    pub fn with_reserved_connections(mut self, reserved: usize) -> Self {
        self.reserved_connections = reserved;
        self
    }

    /// Override the per-command priority
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Context sharing usage and reservation but cancelled together with `self`
    /// and independently through its own token
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// The cancellation token
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Usage tag
    pub fn usage(&self) -> UsageContext {
        self.usage
    }

    /// Reserved-connection count
    pub fn reserved_connections(&self) -> usize {
        self.reserved_connections
    }

    /// Priority for a command whose natural class is `default`
    pub fn priority_or(&self, default: Priority) -> Priority {
        self.priority.unwrap_or(default)
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail fast with [`NntpError::Cancelled`] when cancellation was requested
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(NntpError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `fut` until it completes or the context is cancelled
    pub async fn run<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(NntpError::Cancelled),
            res = fut => res,
        }
    }
}
