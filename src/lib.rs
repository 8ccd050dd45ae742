#![doc = include_str!("../README.md")]

/// Bounded LRU map used by the header cache
pub mod cache;
/// Article clients: retry, failover, throttling and caching layers
pub mod client;
/// NNTP command builders and response parsers
pub mod commands;
mod config;
/// Single NNTP sessions and the factories that open them
pub mod connection;
mod context;
mod error;
mod events;
mod gate;
/// Segment availability checks
pub mod health;
mod jobs;
mod pool;
mod response;
/// Seekable byte streams over segmented files
pub mod stream;
mod usenet;
/// yEnc binary encoding/decoding for Usenet
pub mod yenc;

pub use cache::LruCache;
pub use client::{
    ArticleCachingClient, DecodedArticle, DecodedSegment, GroupStats, HeaderCachingClient,
    MultiConnectionClient, MultiProviderClient, NntpClient, OnConnectionReady, ProviderClient,
    ProviderEntry, ProviderStats, ThrottlingClient,
};
pub use commands::{ArticleHeaders, ArticleStat};
pub use config::{ProviderConfig, ProviderTier, UsenetConfig};
pub use connection::{
    ArticleConnection, AsyncStream, ConnectionFactory, ConnectionState, NntpConnection,
    TcpConnectionFactory,
};
pub use context::{Priority, RequestContext, UsageContext};
pub use error::{NntpError, Result};
pub use events::{ConnectionStats, ConnectionUsageEvent};
pub use gate::{DEFAULT_HIGH_PRIORITY_ODDS, GatePermit, PrioritySemaphore};
pub use health::HealthChecker;
pub use jobs::{JobCoordinator, JobHandle, RunningJobInfo};
pub use pool::{
    ConnectionLock, ConnectionPool, DEFAULT_IDLE_TIMEOUT, PoolConfig, PoolObserver, PoolSnapshot,
};
pub use response::{NntpBinaryResponse, NntpResponse, StatusClass, codes};
pub use stream::{
    AesDecoderStream, ByteStream, FilePart, MemoryStream, MultipartFileStream, NzbFileStream,
    SeekableStream, StreamOptions, SubRangeStream,
};
pub use usenet::{FactoryBuilder, UsenetStreamingClient};
pub use yenc::{
    YencDecoded, YencEnd, YencHeader, YencPart, decode as yenc_decode, encode as yenc_encode,
};
