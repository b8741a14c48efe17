//! The fuse: a per-service circuit breaker (spec.md §3, §4.A).
//!
//! Grounded on the teacher crate's `circuit_breaker.rs` for the overall
//! shape (a `Clock`-parameterized policy object guarding a mutable state
//! machine) but reworked around a sliding window of failure timestamps
//! instead of a bare atomic counter, because spec.md requires eviction of
//! failures older than `window_ms` before the threshold check — a counter
//! alone can't tell an old failure from a recent one. Per spec.md §4.D,
//! "a single updater per fuse/limiter is sufficient," so this uses a
//! `Mutex<FuseInner>` rather than the teacher's lock-free atomics.
//!
//! There is deliberately no half-open state (spec.md §4.F): probing after
//! `refresh_ms` is implicit in the next `ask`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, MonotonicClock};

/// How a fuse decides when to blow.
#[derive(Debug, Clone, Copy)]
pub enum FuseStrategy {
    /// Blow after `max_failures + 1` failures land inside `window_ms`.
    Standard { max_failures: usize, window_ms: u64 },
    /// Like `Standard`, but additionally reports Blown on a `rate` fraction
    /// of asks regardless of the underlying state (spec.md §4.A edge cases).
    FaultInjection { rate: f64, max_failures: usize, window_ms: u64 },
}

impl FuseStrategy {
    fn max_failures(&self) -> usize {
        match self {
            FuseStrategy::Standard { max_failures, .. } => *max_failures,
            FuseStrategy::FaultInjection { max_failures, .. } => *max_failures,
        }
    }

    fn window_ms(&self) -> u64 {
        match self {
            FuseStrategy::Standard { window_ms, .. } => *window_ms,
            FuseStrategy::FaultInjection { window_ms, .. } => *window_ms,
        }
    }
}

/// Configuration for [`Fuse::new`] / [`crate::registry::Registry::start`].
#[derive(Debug, Clone, Copy)]
pub struct FuseOptions {
    pub strategy: FuseStrategy,
    pub refresh_ms: u64,
}

impl Default for FuseOptions {
    /// `Standard{10, 10_000}`, refresh after 60s — matches spec.md §6.
    fn default() -> Self {
        Self {
            strategy: FuseStrategy::Standard { max_failures: 10, window_ms: 10_000 },
            refresh_ms: 60_000,
        }
    }
}

/// The result of [`Fuse::ask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuseStatus {
    Ok,
    Blown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ok,
    Blown { since: u64 },
}

#[derive(Debug)]
struct FuseInner {
    strategy: FuseStrategy,
    refresh_ms: u64,
    /// Timestamps (millis) of failures observed while `Ok`, oldest first.
    failures: VecDeque<u64>,
    state: State,
}

impl FuseInner {
    fn evict_expired(&mut self, now: u64) {
        let window_ms = self.strategy.window_ms();
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_sub(oldest) > window_ms {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// A named circuit breaker. One [`Fuse`] per service, owned by the
/// [`crate::registry::Registry`].
#[derive(Debug)]
pub struct Fuse {
    inner: Mutex<FuseInner>,
    clock: Arc<dyn Clock>,
}

impl Fuse {
    pub fn new(options: FuseOptions) -> Self {
        Self::with_clock(options, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(options: FuseOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(FuseInner {
                strategy: options.strategy,
                refresh_ms: options.refresh_ms,
                failures: VecDeque::new(),
                state: State::Ok,
            }),
            clock,
        }
    }

    /// Pure read with lazy `Blown -> Ok` transition (spec.md §4.A).
    pub fn ask(&self) -> FuseStatus {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().expect("fuse mutex poisoned");

        if let State::Blown { since } = inner.state {
            if now >= since.saturating_add(inner.refresh_ms) {
                inner.state = State::Ok;
                inner.failures.clear();
                tracing::info!(refresh_ms = inner.refresh_ms, "fuse -> ok (refresh elapsed)");
            }
        }

        if matches!(inner.state, State::Blown { .. }) {
            return FuseStatus::Blown;
        }

        if let FuseStrategy::FaultInjection { rate, .. } = inner.strategy {
            if rand::random::<f64>() < rate {
                tracing::debug!("fuse injected Blown (fault injection)");
                return FuseStatus::Blown;
            }
        }

        FuseStatus::Ok
    }

    /// Record a failure at the current time.
    ///
    /// A melt observed while Blown is accepted but does not extend `since`
    /// (spec.md §4.A edge cases).
    pub fn melt(&self) {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().expect("fuse mutex poisoned");

        if matches!(inner.state, State::Blown { .. }) {
            return;
        }

        inner.evict_expired(now);
        inner.failures.push_back(now);

        let threshold = inner.strategy.max_failures();
        if inner.failures.len() >= threshold + 1 {
            inner.state = State::Blown { since: now };
            tracing::warn!(failures = inner.failures.len(), threshold, "fuse -> blown");
        }
    }

    /// Force the fuse back to `Ok`, clearing counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("fuse mutex poisoned");
        inner.state = State::Ok;
        inner.failures.clear();
        tracing::info!("fuse reset -> ok");
    }

    #[cfg(test)]
    fn failure_count(&self) -> usize {
        self.inner.lock().unwrap().failures.len()
    }
}
