//! Per-provider request statistics

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Request counters of one provider at a point in time
///
/// A missing article is counted separately and is not a failure: the
/// provider answered correctly, it just does not carry that segment.
#[derive(Debug, Clone, Default)]
pub struct ProviderStats {
    /// `host:port` of the provider
    pub provider: String,
    /// Operations attempted, whatever the outcome
    pub requests: u64,
    /// Operations that returned an answer
    pub succeeded: u64,
    /// Operations that failed (connect, protocol, timeouts)
    pub failed: u64,
    /// Operations answered with "no such article"
    pub not_found: u64,
    /// Decoded payload bytes received
    pub bytes: u64,
    pub last_success: Option<Instant>,
    pub last_failure: Option<Instant>,
    /// Failures since the last success
    pub failure_streak: u32,
}

impl ProviderStats {
    /// Share of requests that were not failures; 1.0 before any request
    ///
    /// "No such article" answers count as available.
    #[must_use]
    pub fn availability(&self) -> f64 {
        match self.requests {
            0 => 1.0,
            n => (n - self.failed) as f64 / n as f64,
        }
    }
}

/// Aggregate statistics of a provider group
#[derive(Debug, Clone, Default)]
pub struct GroupStats {
    /// Operations across all providers
    pub total_requests: u64,
    /// "No such article" answers across all providers
    pub total_not_found: u64,
    /// Times an operation moved on to the next provider
    pub failover_count: u64,
    /// Per-provider statistics, in configuration order
    pub per_provider: Vec<ProviderStats>,
}

#[derive(Debug, Default)]
struct Timestamps {
    success: Option<Instant>,
    failure: Option<Instant>,
}

/// Shared, lock-free counters feeding [`ProviderStats`] snapshots
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    provider: String,
    requests: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    not_found: AtomicU64,
    bytes: AtomicU64,
    failure_streak: AtomicU32,
    seen: Mutex<Timestamps>,
}

impl StatsRecorder {
    pub(crate) fn new(provider: String) -> Self {
        Self {
            provider,
            ..Self::default()
        }
    }

    fn count(&self, counter: &AtomicU64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn stamp(&self, update: impl FnOnce(&mut Timestamps)) {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        update(&mut *seen);
    }

    pub(crate) fn record_success(&self, bytes: u64) {
        self.count(&self.succeeded);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.failure_streak.store(0, Ordering::Relaxed);
        self.stamp(|seen| seen.success = Some(Instant::now()));
    }

    pub(crate) fn record_failure(&self) {
        self.count(&self.failed);
        self.failure_streak.fetch_add(1, Ordering::Relaxed);
        self.stamp(|seen| seen.failure = Some(Instant::now()));
    }

    pub(crate) fn record_not_found(&self) {
        self.count(&self.not_found);
    }

    pub(crate) fn snapshot(&self) -> ProviderStats {
        let (last_success, last_failure) = {
            let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            (seen.success, seen.failure)
        };
        ProviderStats {
            provider: self.provider.clone(),
            requests: self.requests.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            last_success,
            last_failure,
            failure_streak: self.failure_streak.load(Ordering::Relaxed),
        }
    }
}
