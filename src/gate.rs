//! Priority admission gate
//!
//! [`PrioritySemaphore`] hands out a fixed number of permits to two classes
//! of waiters. When both classes are waiting, every freed permit goes to a
//! High waiter with probability `high_priority_odds`% and to a Low waiter
//! otherwise, so bulk queue work keeps moving while interactive streaming
//! gets most of the capacity.
//!
//! A waiter may ask for a reservation: with `reserved = n` it is only
//! admitted while more than `n` permits are free, leaving `n` for others.
//!
//! # Example
//!
//! ```
//! use nntp_stream::{Priority, PrioritySemaphore};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> nntp_stream::Result<()> {
//! let gate = PrioritySemaphore::new(4, 80);
//! let cancel = CancellationToken::new();
//!
//! let permit = gate.acquire(Priority::High, 0, &cancel).await?;
//! assert_eq!(gate.available(), 3);
//! drop(permit);
//! assert_eq!(gate.available(), 4);
//! # Ok(())
//! # }
//! ```

use crate::context::Priority;
use crate::error::{NntpError, Result};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Default percentage of contested permits that go to High waiters
pub const DEFAULT_HIGH_PRIORITY_ODDS: u8 = 80;

struct Waiter {
    id: u64,
    reserved: usize,
    tx: oneshot::Sender<()>,
}

struct GateState {
    max: usize,
    in_use: usize,
    high_odds: u8,
    high: VecDeque<Waiter>,
    low: VecDeque<Waiter>,
    next_id: u64,
    closed: bool,
}

impl GateState {
    fn free(&self) -> usize {
        self.max.saturating_sub(self.in_use)
    }

    fn queue_mut(&mut self, priority: Priority) -> &mut VecDeque<Waiter> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Low => &mut self.low,
        }
    }

    /// First waiter in a queue that fits in the free capacity
    fn eligible(queue: &VecDeque<Waiter>, free: usize) -> Option<usize> {
        queue.iter().position(|w| free > w.reserved)
    }

    /// Hand free permits to waiters until none fit
    fn dispatch(&mut self) {
        loop {
            let free = self.free();
            if free == 0 {
                return;
            }

            let high = Self::eligible(&self.high, free);
            let low = Self::eligible(&self.low, free);
            let (queue, pos) = match (high, low) {
                (None, None) => return,
                (Some(h), None) => (Priority::High, h),
                (None, Some(l)) => (Priority::Low, l),
                (Some(h), Some(l)) => {
                    if rand::thread_rng().gen_range(0..100u8) < self.high_odds {
                        (Priority::High, h)
                    } else {
                        (Priority::Low, l)
                    }
                }
            };

            let Some(waiter) = self.queue_mut(queue).remove(pos) else {
                return;
            };
            self.in_use += 1;
            if waiter.tx.send(()).is_err() {
                // Receiver gone before its guard could dequeue it
                self.in_use -= 1;
            } else {
                trace!(waiter = waiter.id, ?queue, "gate permit granted");
            }
        }
    }

    fn release(&mut self) {
        self.in_use = self.in_use.saturating_sub(1);
        self.dispatch();
    }
}

/// Two-class counting semaphore with weighted admission
///
/// Cloning shares the same permits.
#[derive(Clone)]
pub struct PrioritySemaphore {
    state: Arc<Mutex<GateState>>,
}

impl std::fmt::Debug for PrioritySemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("PrioritySemaphore")
            .field("max", &state.max)
            .field("in_use", &state.in_use)
            .field("high_odds", &state.high_odds)
            .field("waiting_high", &state.high.len())
            .field("waiting_low", &state.low.len())
            .finish()
    }
}

fn lock_state(state: &Mutex<GateState>) -> MutexGuard<'_, GateState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl PrioritySemaphore {
    /// Create a gate with `max` permits
    ///
    /// `high_priority_odds` is clamped to 0..=100.
    pub fn new(max: usize, high_priority_odds: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                max,
                in_use: 0,
                high_odds: high_priority_odds.min(100),
                high: VecDeque::new(),
                low: VecDeque::new(),
                next_id: 0,
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        lock_state(&self.state)
    }

    /// Wait for a permit
    ///
    /// Admitted once more than `reserved` permits are free. A new caller
    /// only bypasses the queue when nobody is waiting.
    ///
    /// # Errors
    ///
    /// - [`NntpError::Cancelled`] - `cancel` fired first; no permit is held
    /// - [`NntpError::PoolShutdown`] - the gate was closed
    pub async fn acquire(
        &self,
        priority: Priority,
        reserved: usize,
        cancel: &CancellationToken,
    ) -> Result<GatePermit> {
        let (id, rx) = {
            let mut state = self.lock();
            if state.closed {
                return Err(NntpError::PoolShutdown);
            }
            if state.high.is_empty() && state.low.is_empty() && state.free() > reserved {
                state.in_use += 1;
                return Ok(self.permit());
            }

            let id = state.next_id;
            state.next_id += 1;
            let (tx, rx) = oneshot::channel();
            state.queue_mut(priority).push_back(Waiter { id, reserved, tx });
            state.dispatch();
            (id, rx)
        };

        let mut wait = PendingWait {
            state: self.state.clone(),
            id,
            priority,
            rx,
            done: false,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NntpError::Cancelled),
            granted = &mut wait.rx => {
                wait.done = true;
                match granted {
                    Ok(()) => Ok(self.permit()),
                    Err(_) => Err(NntpError::PoolShutdown),
                }
            }
        }
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self, reserved: usize) -> Option<GatePermit> {
        let mut state = self.lock();
        if state.closed
            || !(state.high.is_empty() && state.low.is_empty())
            || state.free() <= reserved
        {
            return None;
        }
        state.in_use += 1;
        Some(self.permit())
    }

    fn permit(&self) -> GatePermit {
        GatePermit {
            state: self.state.clone(),
        }
    }

    /// Change capacity; waiters are admitted immediately if it grew
    ///
    /// Shrinking never revokes permits already handed out.
    pub fn set_max(&self, max: usize) {
        let mut state = self.lock();
        state.max = max;
        state.dispatch();
    }

    /// Change the share of contested permits that go to High waiters
    pub fn set_priority_odds(&self, high_priority_odds: u8) {
        let mut state = self.lock();
        state.high_odds = high_priority_odds.min(100);
    }

    /// Fail every current and future waiter with [`NntpError::PoolShutdown`]
    ///
    /// Permits already held stay valid until dropped.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.high.clear();
        state.low.clear();
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.lock().free()
    }

    /// Permits currently held
    pub fn in_use(&self) -> usize {
        self.lock().in_use
    }

    /// Configured capacity
    pub fn max(&self) -> usize {
        self.lock().max
    }

    /// Current High odds in percent
    pub fn priority_odds(&self) -> u8 {
        self.lock().high_odds
    }

    /// Number of (High, Low) waiters
    pub fn waiting(&self) -> (usize, usize) {
        let state = self.lock();
        (state.high.len(), state.low.len())
    }
}

/// Cleans up a waiter whose `acquire` future was cancelled or dropped
struct PendingWait {
    state: Arc<Mutex<GateState>>,
    id: u64,
    priority: Priority,
    rx: oneshot::Receiver<()>,
    done: bool,
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut state = lock_state(&self.state);
        let queue = state.queue_mut(self.priority);
        if let Some(pos) = queue.iter().position(|w| w.id == self.id) {
            queue.remove(pos);
            // Our departure may unblock a waiter behind us with a smaller reservation
            state.dispatch();
        } else if self.rx.try_recv().is_ok() {
            // Granted between the wake-up and the cancellation: give it back
            state.release();
        }
    }
}

/// A held gate permit; released on drop
#[must_use]
pub struct GatePermit {
    state: Arc<Mutex<GateState>>,
}

impl std::fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatePermit").finish_non_exhaustive()
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        lock_state(&self.state).release();
    }
}
