//! Connection usage events
//!
//! Every provider pool reports its counts to a [`ConnectionStats`] hub,
//! which republishes them together with totals across providers on a
//! broadcast channel. Consumers (typically a UI drawing utilisation bars)
//! call [`ConnectionStats::subscribe`].

use crate::config::ProviderTier;
use crate::context::UsageContext;
use crate::pool::{PoolObserver, PoolSnapshot};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Pool counts of one provider plus totals across reporting providers
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionUsageEvent {
    /// Index of the provider in the configuration
    pub provider_index: usize,
    /// Live sessions of this provider
    pub live: usize,
    /// Idle sessions of this provider
    pub idle: usize,
    /// Live sessions across providers whose tier reports stats
    pub total_live: usize,
    /// Capacity of this provider
    pub max: usize,
    /// Idle sessions across providers whose tier reports stats
    pub total_idle: usize,
    /// Borrowed sessions of this provider per usage tag
    pub usage: BTreeMap<UsageContext, usize>,
}

#[derive(Debug, Default, Clone)]
struct ProviderSlot {
    reports_stats: bool,
    live: usize,
    idle: usize,
}

#[derive(Debug)]
struct Hub {
    slots: Mutex<Vec<ProviderSlot>>,
    tx: broadcast::Sender<ConnectionUsageEvent>,
}

impl Hub {
    fn publish(&self, provider_index: usize, snapshot: &PoolSnapshot) {
        let (total_live, total_idle) = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            if slots.len() <= provider_index {
                slots.resize(provider_index + 1, ProviderSlot::default());
            }
            let slot = &mut slots[provider_index];
            slot.live = snapshot.live;
            slot.idle = snapshot.idle;

            slots
                .iter()
                .filter(|s| s.reports_stats)
                .fold((0, 0), |(live, idle), s| (live + s.live, idle + s.idle))
        };

        let event = ConnectionUsageEvent {
            provider_index,
            live: snapshot.live,
            idle: snapshot.idle,
            total_live,
            max: snapshot.max,
            total_idle,
            usage: snapshot.usage.clone(),
        };
        // No subscribers is fine
        self.tx.send(event).ok();
    }
}

/// Collects pool changes and broadcasts [`ConnectionUsageEvent`]s
///
/// # Example
///
/// ```
/// use nntp_stream::ConnectionStats;
///
/// # async fn example() {
/// let stats = ConnectionStats::new();
/// let mut events = stats.subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = events.recv().await {
///         println!("provider {}: {}/{} live", event.provider_index, event.live, event.max);
///     }
/// });
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    hub: Arc<Hub>,
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStats {
    /// Create a hub with no providers
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            hub: Arc::new(Hub {
                slots: Mutex::new(Vec::new()),
                tx,
            }),
        }
    }

    /// Receive every future event
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionUsageEvent> {
        self.hub.tx.subscribe()
    }

    /// Observer to attach to the pool of provider `provider_index`
    ///
    /// Registering an index again (after a reload) resets its counts.
    pub fn observer(&self, provider_index: usize, tier: ProviderTier) -> Arc<dyn PoolObserver> {
        {
            let mut slots = self.hub.slots.lock().unwrap_or_else(|e| e.into_inner());
            if slots.len() <= provider_index {
                slots.resize(provider_index + 1, ProviderSlot::default());
            }
            slots[provider_index] = ProviderSlot {
                reports_stats: tier.reports_stats(),
                live: 0,
                idle: 0,
            };
        }
        Arc::new(ProviderObserver {
            provider_index,
            hub: self.hub.clone(),
        })
    }

    /// Record the current counts of provider `provider_index` without
    /// publishing an event
    ///
    /// Used when an already populated pool gets a fresh observer, so totals
    /// do not drop to zero until that pool next changes.
    pub(crate) fn seed(&self, provider_index: usize, snapshot: &PoolSnapshot) {
        let mut slots = self.hub.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get_mut(provider_index) {
            slot.live = snapshot.live;
            slot.idle = snapshot.idle;
        }
    }

    /// Forget providers at and beyond `count`
    pub fn truncate(&self, count: usize) {
        self.hub
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .truncate(count);
    }

    /// Live and idle sessions across reporting providers
    pub fn totals(&self) -> (usize, usize) {
        self.hub
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.reports_stats)
            .fold((0, 0), |(live, idle), s| (live + s.live, idle + s.idle))
    }
}

struct ProviderObserver {
    provider_index: usize,
    hub: Arc<Hub>,
}

impl PoolObserver for ProviderObserver {
    fn pool_changed(&self, snapshot: &PoolSnapshot) {
        self.hub.publish(self.provider_index, snapshot);
    }
}
