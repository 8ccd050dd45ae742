//! Usenet provider and client-stack configuration
//!
//! Loading configuration from disk is the caller's concern; these types only
//! describe what the client graph is built from.

use std::time::Duration;

/// Participation of a provider in failover ordering
///
/// Providers are tried in ascending tier order. `Disabled` providers are never
/// used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProviderTier {
    /// Never used
    Disabled,
    /// Primary provider, pooled and surfaced to the admission gate
    Pooled,
    /// Backup provider whose counters are still reported
    BackupAndStats,
    /// Backup provider used only when everything above failed
    BackupOnly,
}

impl ProviderTier {
    /// Whether live/idle counters of this provider are surfaced to observers
    pub fn reports_stats(self) -> bool {
        matches!(self, ProviderTier::Pooled | ProviderTier::BackupAndStats)
    }
}

/// NNTP provider configuration
///
/// Contains everything needed to open connections to one Usenet provider.
///
/// # Example
///
/// ```
/// use nntp_stream::{ProviderConfig, ProviderTier};
///
/// let config = ProviderConfig::tls("news.example.com", "user", "pass").with_max_connections(20);
/// assert_eq!(config.port, 563);
/// assert_eq!(config.tier, ProviderTier::Pooled);
/// ```
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProviderConfig {
    /// Failover tier
    pub tier: ProviderTier,

    /// Server hostname (e.g., "news.example.com")
    pub host: String,

    /// Server port (typically 119 for plain, 563 for TLS)
    pub port: u16,

    /// Use TLS/SSL encryption
    #[cfg_attr(feature = "serde", serde(default = "default_tls"))]
    pub use_tls: bool,

    /// Allow insecure TLS connections (self-signed certificates, expired certificates)
    ///
    /// **Security Warning:** Setting this to `true` disables certificate validation,
    /// making your connection vulnerable to man-in-the-middle attacks.
    #[cfg_attr(feature = "serde", serde(default))]
    pub allow_insecure_tls: bool,

    /// Username for authentication (empty to skip AUTHINFO)
    pub username: String,

    /// Password for authentication
    pub password: String,

    /// Maximum simultaneous connections to this provider
    pub max_connections: usize,
}

#[cfg(feature = "serde")]
fn default_tls() -> bool {
    true
}

impl ProviderConfig {
    /// Create a new provider configuration in the `Pooled` tier with 10 connections
    pub fn new(
        host: impl Into<String>,
        port: u16,
        use_tls: bool,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            tier: ProviderTier::Pooled,
            host: host.into(),
            port,
            use_tls,
            allow_insecure_tls: false,
            username: username.into(),
            password: password.into(),
            max_connections: 10,
        }
    }

    /// Create a configuration for a TLS connection on the standard secure port (563)
    pub fn tls(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, 563, true, username, password)
    }

    /// Create a configuration for a plain connection on the standard port (119)
    ///
    /// **Warning:** Plain connections transmit credentials in clear text.
    pub fn plain(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, 119, false, username, password)
    }

    /// Create a TLS configuration that accepts self-signed certificates
    ///
    /// **Security Warning:** This configuration disables certificate validation.
    pub fn tls_insecure(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut config = Self::tls(host, username, password);
        config.allow_insecure_tls = true;
        config
    }

    /// Set the failover tier
    pub fn with_tier(mut self, tier: ProviderTier) -> Self {
        self.tier = tier;
        self
    }

    /// Set the connection limit
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Whether AUTHINFO should be sent after the greeting
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    /// Identifier used in logs and statistics
    pub fn server_id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration of the whole streaming client stack
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UsenetConfig {
    /// Providers in configuration order (index is the provider index in events)
    pub providers: Vec<ProviderConfig>,

    /// Idle connections older than this are closed
    #[cfg_attr(feature = "serde", serde(default = "default_idle_timeout"))]
    pub idle_timeout: Duration,

    /// Cap on concurrent BODY/ARTICLE downloads across all providers
    pub max_download_connections: usize,

    /// Percentage (0-100) with which a high-priority waiter wins a contested slot
    pub high_priority_odds: u8,

    /// Number of yEnc headers kept in memory
    pub header_cache_capacity: usize,

    /// Cache decoded article bodies in a temporary directory
    pub article_cache_enabled: bool,

    /// Segments buffered ahead by file streams (0 selects the unbuffered stream)
    pub stream_buffer_segments: usize,

    /// Connections used concurrently by one buffered file stream
    pub stream_connections: usize,

    /// Retries with a fresh connection after a failed command
    pub max_retries: u32,
}

#[cfg(feature = "serde")]
fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for UsenetConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            idle_timeout: Duration::from_secs(60),
            max_download_connections: 15,
            high_priority_odds: 80,
            header_cache_capacity: 8192,
            article_cache_enabled: false,
            stream_buffer_segments: 8,
            stream_connections: 4,
            max_retries: 1,
        }
    }
}

impl UsenetConfig {
    /// Create a configuration for the given providers with default tuning
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self {
            providers,
            ..Default::default()
        }
    }

    /// Sum of connection limits of all non-disabled providers
    pub fn total_connections(&self) -> usize {
        self.providers
            .iter()
            .filter(|p| p.tier != ProviderTier::Disabled)
            .map(|p| p.max_connections)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let config = ProviderConfig::new("news.example.com", 563, true, "user", "pass");
        assert_eq!(config.host, "news.example.com");
        assert_eq!(config.port, 563);
        assert!(config.use_tls);
        assert!(!config.allow_insecure_tls);
        assert_eq!(config.username, "user");
        assert_eq!(config.password, "pass");
        assert_eq!(config.tier, ProviderTier::Pooled);
    }

    #[test]
    fn test_plain_helper() {
        let config = ProviderConfig::plain("news.example.com", "user", "pass");
        assert_eq!(config.port, 119);
        assert!(!config.use_tls);
    }

    #[test]
    fn test_tls_insecure_helper() {
        let config = ProviderConfig::tls_insecure("localhost", "user", "pass");
        assert_eq!(config.port, 563);
        assert!(config.use_tls);
        assert!(config.allow_insecure_tls);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(ProviderTier::Pooled < ProviderTier::BackupAndStats);
        assert!(ProviderTier::BackupAndStats < ProviderTier::BackupOnly);
        assert!(ProviderTier::Pooled.reports_stats());
        assert!(!ProviderTier::BackupOnly.reports_stats());
    }

    #[test]
    fn test_total_connections_skips_disabled() {
        let config = UsenetConfig::new(vec![
            ProviderConfig::tls("a", "u", "p").with_max_connections(5),
            ProviderConfig::tls("b", "u", "p")
                .with_max_connections(7)
                .with_tier(ProviderTier::Disabled),
            ProviderConfig::tls("c", "u", "p")
                .with_max_connections(3)
                .with_tier(ProviderTier::BackupOnly),
        ]);
        assert_eq!(config.total_connections(), 8);
    }
}
