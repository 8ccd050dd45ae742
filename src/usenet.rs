//! The assembled streaming client
//!
//! [`UsenetStreamingClient`] owns the whole client graph built from a
//! [`UsenetConfig`]:
//!
//! ```text
//! ArticleCachingClient (optional)
//!   HeaderCachingClient
//!     ThrottlingClient
//!       MultiProviderClient
//!         MultiConnectionClient + ConnectionPool   (one per provider)
//!           NntpConnection
//! ```
//!
//! Pools of the same tier share one admission gate sized to the tier's
//! combined connection limit. Every pool reports to a [`ConnectionStats`]
//! hub.

use crate::client::{
    ArticleCachingClient, GroupStats, HeaderCachingClient, MultiConnectionClient,
    MultiProviderClient, NntpClient, ProviderClient, ProviderEntry, ThrottlingClient,
};
use crate::config::{ProviderConfig, ProviderTier, UsenetConfig};
use crate::connection::{ConnectionFactory, TcpConnectionFactory};
use crate::context::RequestContext;
use crate::error::Result;
use crate::events::{ConnectionStats, ConnectionUsageEvent};
use crate::gate::PrioritySemaphore;
use crate::health::HealthChecker;
use crate::jobs::JobCoordinator;
use crate::pool::{ConnectionPool, PoolConfig, PoolSnapshot};
use crate::stream::{FilePart, MultipartFileStream, NzbFileStream, StreamOptions};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Builds the connection factory of one provider
pub type FactoryBuilder<F> = Arc<dyn Fn(Arc<ProviderConfig>) -> F + Send + Sync>;

type Throttled = ThrottlingClient<Arc<MultiProviderClient>>;
type HeaderCached = HeaderCachingClient<Arc<Throttled>>;

struct ProviderHandle<F: ConnectionFactory> {
    config: ProviderConfig,
    entry: ProviderEntry,
    connections: Arc<MultiConnectionClient<F>>,
}

/// Client graph for streaming files from Usenet
///
/// # Example
///
/// ```no_run
/// use nntp_stream::{ProviderConfig, RequestContext, UsenetConfig, UsenetStreamingClient};
///
/// # async fn example() -> nntp_stream::Result<()> {
/// let config = UsenetConfig::new(vec![ProviderConfig::tls("news.example.com", "user", "pass")]);
/// let client = UsenetStreamingClient::new(config)?;
///
/// let ids = vec!["part1of2@example".to_string(), "part2of2@example".to_string()];
/// let mut file = client.open_file(ids, None, &RequestContext::new()).await?;
/// let data = nntp_stream::stream::read_to_end(&mut file).await?;
///
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct UsenetStreamingClient<F: ConnectionFactory = TcpConnectionFactory> {
    config: RwLock<UsenetConfig>,
    factory_builder: FactoryBuilder<F>,
    stats: ConnectionStats,
    gates: Mutex<BTreeMap<ProviderTier, PrioritySemaphore>>,
    handles: Mutex<Vec<ProviderHandle<F>>>,
    providers: Arc<MultiProviderClient>,
    throttle: Arc<Throttled>,
    headers: Arc<HeaderCached>,
    article_cache: Option<Arc<ArticleCachingClient<Arc<HeaderCached>>>>,
    client: Arc<dyn NntpClient>,
    jobs: JobCoordinator,
}

impl UsenetStreamingClient<TcpConnectionFactory> {
    /// Build the client graph with network connections
    ///
    /// Must be called inside a tokio runtime so that pools can start their
    /// idle sweep. No connection is opened until the first request.
    pub fn new(config: UsenetConfig) -> Result<Self> {
        Self::with_factory(config, Arc::new(TcpConnectionFactory::new))
    }
}

impl<F: ConnectionFactory> UsenetStreamingClient<F> {
    /// Build the client graph with custom connection factories
    ///
    /// # Errors
    ///
    /// Fails only when the article cache directory cannot be created.
    pub fn with_factory(config: UsenetConfig, factory_builder: FactoryBuilder<F>) -> Result<Self> {
        let stats = ConnectionStats::new();
        let gates = tier_gates(&config, &BTreeMap::new());
        let (handles, _) = build_handles(&config, Vec::new(), &gates, &factory_builder, &stats);
        stats.truncate(handles.len());

        let providers = Arc::new(MultiProviderClient::new(
            handles.iter().map(|h| h.entry.clone()).collect(),
        ));
        let throttle = Arc::new(ThrottlingClient::new(
            providers.clone(),
            config.max_download_connections,
            config.high_priority_odds,
        ));
        let headers = Arc::new(HeaderCachingClient::new(
            throttle.clone(),
            config.header_cache_capacity,
        ));
        let article_cache = match config.article_cache_enabled {
            true => Some(Arc::new(ArticleCachingClient::new(headers.clone())?)),
            false => None,
        };
        let client: Arc<dyn NntpClient> = match &article_cache {
            Some(cache) => cache.clone(),
            None => headers.clone(),
        };

        info!(
            "Usenet client ready: {} providers, {} connections",
            handles.len(),
            config.total_connections()
        );

        Ok(Self {
            config: RwLock::new(config),
            factory_builder,
            stats,
            gates: Mutex::new(gates),
            handles: Mutex::new(handles),
            providers,
            throttle,
            headers,
            article_cache,
            client,
            jobs: JobCoordinator::new(),
        })
    }

    /// The outermost client of the graph
    pub fn client(&self) -> Arc<dyn NntpClient> {
        self.client.clone()
    }

    /// Current configuration
    pub fn config(&self) -> UsenetConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Stream options derived from the configuration
    pub fn stream_options(&self) -> StreamOptions {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        StreamOptions {
            buffer_segments: config.stream_buffer_segments,
            connections: config.stream_connections,
        }
    }

    /// Open a file posted as `segment_ids`
    ///
    /// Without `file_size` the size is read from the last segment's yEnc
    /// header.
    pub async fn open_file(
        &self,
        segment_ids: Vec<String>,
        file_size: Option<u64>,
        ctx: &RequestContext,
    ) -> Result<NzbFileStream> {
        NzbFileStream::open(self.client(), segment_ids, file_size, self.stream_options(), ctx).await
    }

    /// Open byte ranges of several posted files as one stream
    pub fn open_multipart(&self, parts: Vec<FilePart>, ctx: &RequestContext) -> MultipartFileStream {
        MultipartFileStream::new(self.client(), parts, self.stream_options(), ctx)
    }

    /// Availability checks through the full client graph
    pub fn health_checker(&self) -> HealthChecker {
        HealthChecker::new(self.client())
    }

    /// See [`HealthChecker::check_segments_healthy`]
    pub async fn check_segments_healthy(
        &self,
        segment_ids: &[String],
        sample_percent: u8,
        healthy_threshold_percent: u8,
        ctx: &RequestContext,
    ) -> Result<bool> {
        self.health_checker()
            .check_segments_healthy(segment_ids, sample_percent, healthy_threshold_percent, ctx)
            .await
    }

    /// Exclusive job slot for maintenance work
    pub fn jobs(&self) -> &JobCoordinator {
        &self.jobs
    }

    /// Receive a [`ConnectionUsageEvent`] on every pool change
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionUsageEvent> {
        self.stats.subscribe()
    }

    /// The usage event hub
    pub fn connection_stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Pool counts per provider, in configuration order
    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        self.providers.snapshots()
    }

    /// Request statistics per provider
    pub fn provider_stats(&self) -> GroupStats {
        self.providers.stats()
    }

    /// Downloads currently admitted by the throttle
    pub fn downloads_in_flight(&self) -> usize {
        self.throttle.downloads_in_flight()
    }

    /// Number of cached yEnc headers
    pub fn cached_headers(&self) -> usize {
        self.headers.cached_headers()
    }

    /// Apply a new configuration without restarting unaffected providers
    ///
    /// Providers whose configuration is unchanged keep their pool, sessions
    /// and statistics. Changed, added and removed providers get new pools;
    /// the old pools are shut down in the background once their borrowed
    /// sessions come back. Download limit and priority odds apply at once.
    /// Header cache capacity, the article cache switch and the retry count
    /// of kept providers stay as they were built.
    pub fn reload(&self, config: UsenetConfig) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());

        *gates = tier_gates(&config, &gates);
        let previous = std::mem::take(&mut *handles);
        let (kept, retired) =
            build_handles(&config, previous, &gates, &self.factory_builder, &self.stats);
        self.stats.truncate(kept.len());

        self.providers
            .set_providers(kept.iter().map(|h| h.entry.clone()).collect());
        self.throttle.set_max_downloads(config.max_download_connections);
        self.throttle.set_priority_odds(config.high_priority_odds);
        *handles = kept;
        drop(gates);
        drop(handles);

        for handle in retired {
            // Its index may belong to another provider now
            handle.connections.pool().clear_observer();
            let server = handle.config.server_id();
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    debug!("retiring provider {}", server);
                    runtime.spawn(async move { handle.connections.shutdown().await });
                }
                Err(_) => warn!("no runtime to shut down retired provider {}", server),
            }
        }

        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        info!("configuration reloaded");
    }

    /// Close every pool, cancel the running job and remove the article cache
    pub async fn shutdown(&self) {
        self.jobs.cancel();
        self.providers.shutdown().await;
        if let Some(cache) = &self.article_cache {
            cache.shutdown().await;
        }
        info!("Usenet client shut down");
    }
}

/// One gate per tier sized to the tier's combined connection limit, reusing
/// gates from `existing` so sessions of kept pools stay accounted for
fn tier_gates(
    config: &UsenetConfig,
    existing: &BTreeMap<ProviderTier, PrioritySemaphore>,
) -> BTreeMap<ProviderTier, PrioritySemaphore> {
    let mut sizes: BTreeMap<ProviderTier, usize> = BTreeMap::new();
    for provider in &config.providers {
        *sizes.entry(provider.tier).or_default() += provider.max_connections;
    }

    sizes
        .into_iter()
        .map(|(tier, size)| {
            let gate = match existing.get(&tier) {
                Some(gate) => {
                    gate.set_max(size);
                    gate.set_priority_odds(config.high_priority_odds);
                    gate.clone()
                }
                None => PrioritySemaphore::new(size, config.high_priority_odds),
            };
            (tier, gate)
        })
        .collect()
}

/// Handles for `config.providers`, reusing entries of `previous` whose
/// configuration is unchanged; returns them with the unused previous ones
fn build_handles<F: ConnectionFactory>(
    config: &UsenetConfig,
    previous: Vec<ProviderHandle<F>>,
    gates: &BTreeMap<ProviderTier, PrioritySemaphore>,
    factory_builder: &FactoryBuilder<F>,
    stats: &ConnectionStats,
) -> (Vec<ProviderHandle<F>>, Vec<ProviderHandle<F>>) {
    let mut leftover: Vec<Option<ProviderHandle<F>>> = previous.into_iter().map(Some).collect();
    let mut handles = Vec::with_capacity(config.providers.len());

    for (index, provider) in config.providers.iter().enumerate() {
        let observer = stats.observer(index, provider.tier);
        let reused = leftover
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|h| h.config == *provider))
            .and_then(Option::take);

        let handle = match reused {
            Some(handle) => {
                debug!("keeping provider {} at index {}", provider.server_id(), index);
                let pool = handle.connections.pool();
                pool.set_observer(observer);
                stats.seed(index, &pool.snapshot());
                handle
            }
            None => {
                let shared = Arc::new(provider.clone());
                let pool_config = PoolConfig::new(provider.server_id(), provider.max_connections)
                    .with_idle_timeout(config.idle_timeout);
                let gate = gates
                    .get(&provider.tier)
                    .cloned()
                    .unwrap_or_else(|| PrioritySemaphore::new(provider.max_connections, config.high_priority_odds));
                let pool = ConnectionPool::new(factory_builder(shared.clone()), pool_config, gate);
                pool.set_observer(observer);

                let connections = Arc::new(MultiConnectionClient::new(pool, config.max_retries));
                let entry = ProviderEntry::new(shared, connections.clone() as Arc<dyn ProviderClient>);
                ProviderHandle {
                    config: provider.clone(),
                    entry,
                    connections,
                }
            }
        };
        handles.push(handle);
    }

    (handles, leftover.into_iter().flatten().collect())
}
