//! Per-identity sliding-window limiter with background eviction.
//!
//! # Algorithm
//!
//! Each identity owns a [`Visitor`] holding the instants of its admitted
//! requests inside the trailing window `W`. A request at instant `t`:
//!
//! 1. drops recorded instants `<= t - W`
//! 2. is denied if `N` instants remain (nothing is recorded on denial)
//! 3. otherwise records `t` and is admitted
//!
//! so no identity ever has more than `N` admissions in any interval of
//! length `W`.
//!
//! # Locking
//!
//! ```text
//!  visitors: RwLock<HashMap<identity, Arc<Mutex<Visitor>>>>
//!               │                         │
//!               │ lookup / insert         │ admission (per identity)
//!               ▼                         ▼
//!         held briefly, released   ──▶ held for the prune + decide step
//! ```
//!
//! The table lock is always taken before a record lock and never the other
//! way round. Admission releases the table lock before locking the record, so
//! requests for different identities never wait on each other. No lock is held
//! across an `.await`.
//!
//! # Eviction
//!
//! [`SlidingWindowLimiter::spawn_eviction`] starts one background task that
//! every `T` removes identities idle for longer than the retention `R`. Each
//! removal takes the table write lock on its own, so a large sweep never
//! blocks admissions for its whole duration. Records currently locked by a
//! request are skipped. A request that already cloned a record's `Arc` finishes
//! normally even if the record is evicted underneath it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::metrics;

use super::rate_limit::RateLimitError;

/// Validated limiter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSettings {
    window: Duration,
    max_requests: usize,
    retention: Duration,
    sweep_interval: Duration,
}

impl LimiterSettings {
    /// # Errors
    ///
    /// Rejects a zero request limit and any zero duration.
    pub fn new(
        window: Duration,
        max_requests: usize,
        retention: Duration,
        sweep_interval: Duration,
    ) -> Result<Self, RateLimitError> {
        if max_requests == 0 {
            return Err(RateLimitError::ZeroMaxRequests);
        }
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        if retention.is_zero() {
            return Err(RateLimitError::ZeroRetention);
        }
        if sweep_interval.is_zero() {
            return Err(RateLimitError::ZeroSweepInterval);
        }
        Ok(Self {
            window,
            max_requests,
            retention,
            sweep_interval,
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Recorded. `remaining` more requests fit in the current window.
    Admitted { remaining: usize },
    /// Not recorded. The oldest admission leaves the window after `retry_after`.
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Admission history for one identity.
#[derive(Debug)]
pub struct Visitor {
    last_seen: Instant,
    requests: VecDeque<Instant>,
}

impl Visitor {
    fn new(now: Instant) -> Self {
        Self {
            last_seen: now,
            requests: VecDeque::new(),
        }
    }

    fn is_idle(&self, now: Instant, retention: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > retention
    }
}

type VisitorTable = HashMap<String, Arc<Mutex<Visitor>>>;

/// Sliding-window admission control keyed by client identity.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    settings: LimiterSettings,
    visitors: RwLock<VisitorTable>,
}

impl SlidingWindowLimiter {
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            settings,
            visitors: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    pub fn admit(&self, identity: &str) -> Admission {
        self.admit_at(identity, Instant::now())
    }

    /// Admission check at an explicit instant.
    pub fn admit_at(&self, identity: &str, now: Instant) -> Admission {
        let record = self.record_for(identity, now);
        let mut visitor = record.lock();

        visitor.last_seen = now;
        if let Some(cutoff) = now.checked_sub(self.settings.window) {
            while visitor.requests.front().is_some_and(|&t| t <= cutoff) {
                visitor.requests.pop_front();
            }
        }

        if visitor.requests.len() >= self.settings.max_requests {
            let retry_after = visitor
                .requests
                .front()
                .map(|&oldest| (oldest + self.settings.window).saturating_duration_since(now))
                .unwrap_or(self.settings.window);
            trace!(identity, ?retry_after, "Admission denied");
            return Admission::Denied { retry_after };
        }

        visitor.requests.push_back(now);
        Admission::Admitted {
            remaining: self.settings.max_requests - visitor.requests.len(),
        }
    }

    /// Fetch the record for `identity`, creating it if absent.
    ///
    /// The table lock is released before this returns.
    fn record_for(&self, identity: &str, now: Instant) -> Arc<Mutex<Visitor>> {
        if let Some(record) = self.visitors.read().get(identity) {
            return record.clone();
        }

        // Another request may have inserted it between the two locks
        self.visitors
            .write()
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Visitor::new(now))))
            .clone()
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Remove identities idle for longer than the retention period.
    ///
    /// Returns how many were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let retention = self.settings.retention;
        let is_evictable = |record: &Arc<Mutex<Visitor>>| {
            record
                .try_lock()
                .is_some_and(|visitor| visitor.is_idle(now, retention))
        };

        let candidates: Vec<String> = self
            .visitors
            .read()
            .iter()
            .filter(|(_, record)| is_evictable(record))
            .map(|(identity, _)| identity.clone())
            .collect();

        let mut removed = 0;
        for identity in candidates {
            let mut table = self.visitors.write();
            // The visitor may have come back since the snapshot
            if table.get(&identity).is_some_and(is_evictable) {
                table.remove(&identity);
                removed += 1;
            }
        }
        removed
    }

    /// Number of identities currently tracked.
    pub fn visitor_count(&self) -> usize {
        self.visitors.read().len()
    }

    /// Number of admissions recorded for `identity`, as of its last request.
    pub fn recorded(&self, identity: &str) -> usize {
        let record = self.visitors.read().get(identity).cloned();
        record.map_or(0, |r| r.lock().requests.len())
    }

    /// Start the background eviction task.
    ///
    /// The task holds only a weak reference, so it also stops once the
    /// limiter itself is dropped.
    pub fn spawn_eviction(self: &Arc<Self>) -> EvictionTask {
        let limiter: Weak<Self> = Arc::downgrade(self);
        let period = self.settings.sweep_interval;
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let token = cancel.clone();
        tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => {
                        debug!("Eviction task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(limiter) = limiter.upgrade() else {
                            debug!("Limiter dropped, stopping eviction task");
                            break;
                        };
                        let removed = limiter.sweep();
                        let remaining = limiter.visitor_count();
                        metrics::record_evictions(removed);
                        metrics::set_tracked_visitors(remaining);
                        if removed > 0 {
                            debug!(removed, remaining, "Evicted idle visitors");
                        }
                    }
                }
            }

            debug!("Eviction task shutting down");
        });
        tracker.close();

        info!(
            interval_secs = period.as_secs(),
            retention_secs = self.settings.retention.as_secs(),
            "Visitor eviction task started"
        );
        EvictionTask { cancel, tracker }
    }
}

/// Handle to a running eviction task. Dropping it cancels the task.
#[derive(Debug)]
pub struct EvictionTask {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl EvictionTask {
    /// Cancel the task and wait for it to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.wait().await;
    }

    pub fn is_finished(&self) -> bool {
        self.tracker.is_closed() && self.tracker.is_empty()
    }
}

impl Drop for EvictionTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
