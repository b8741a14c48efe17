//! Per-service rate limiter (spec.md §3, §4.B).
//!
//! Grounded on the teacher crate's `sleeper.rs`-driven testing style and the
//! general "state behind a mutex, clock-parameterized" shape of `fuse.rs`;
//! the admission algorithm itself (sliding window of admission timestamps,
//! `ceil(window/limit)` back-pressure) has no teacher counterpart — the
//! teacher ships a `bulkhead.rs` (a `Semaphore`-backed concurrency limiter)
//! which solves a different problem (bounding concurrency, not bounding
//! admission rate) and is dropped in this transform (see DESIGN.md).

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock};
use crate::sleeper::Sleeper;

/// Validated configuration for a [`RateLimiter`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub limit: u32,
    pub window_ms: u64,
}

/// Rejected configurations (spec.md §8, round-trip property 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitConfigError {
    ZeroLimit,
    ZeroWindow,
}

impl std::fmt::Display for RateLimitConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroLimit => write!(f, "rate limit must be > 0"),
            Self::ZeroWindow => write!(f, "rate limit window_ms must be > 0"),
        }
    }
}

impl std::error::Error for RateLimitConfigError {}

impl RateLimiterConfig {
    pub fn new(limit: u32, window_ms: u64) -> Result<Self, RateLimitConfigError> {
        if limit == 0 {
            return Err(RateLimitConfigError::ZeroLimit);
        }
        if window_ms == 0 {
            return Err(RateLimitConfigError::ZeroWindow);
        }
        Ok(Self { limit, window_ms })
    }
}

/// The decision returned by [`RateLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Defer { delay_ms: u64 },
}

#[derive(Debug)]
struct Inner {
    timestamps: VecDeque<u64>,
}

/// Allows at most `limit` admissions per rolling `window_ms` (spec.md §4.B).
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, inner: Mutex::new(Inner { timestamps: VecDeque::new() }), clock }
    }

    fn back_pressure_delay_ms(&self) -> u64 {
        // ceil(window / limit): the average inter-arrival time compatible
        // with the long-run rate (spec.md §4.B rationale).
        let window = self.config.window_ms;
        let limit = self.config.limit as u64;
        (window + limit - 1) / limit
    }

    /// Admit, or report how long the caller should back off.
    pub fn admit(&self) -> Admission {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().expect("rate limiter mutex poisoned");

        let window_ms = self.config.window_ms;
        while let Some(&oldest) = inner.timestamps.front() {
            if now.saturating_sub(oldest) > window_ms {
                inner.timestamps.pop_front();
            } else {
                break;
            }
        }

        if inner.timestamps.len() < self.config.limit as usize {
            inner.timestamps.push_back(now);
            Admission::Admitted
        } else {
            Admission::Defer { delay_ms: self.back_pressure_delay_ms() }
        }
    }

    /// Poll [`Self::admit`] until admitted, sleeping on `Defer` in between.
    /// `on_defer` is invoked once per deferral, before the sleep, so a caller
    /// can surface a `rate_limited` observation hook (spec.md §7).
    pub async fn admit_with_sleep(&self, sleeper: &dyn Sleeper, mut on_defer: impl FnMut(u64)) {
        loop {
            match self.admit() {
                Admission::Admitted => return,
                Admission::Defer { delay_ms } => {
                    tracing::debug!(delay_ms, "rate limited, deferring");
                    on_defer(delay_ms);
                    if delay_ms > 0 {
                        sleeper.sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }
    }

    /// Poll [`Self::admit`] until admitted, sleeping on `Defer` in between,
    /// then invoke `op`.
    pub async fn call<T, E, Fut, Op>(&self, sleeper: &dyn Sleeper, mut op: Op) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        self.admit_with_sleep(sleeper, |_| {}).await;
        op().await
    }
}

/// A per-service rate limiter slot: either a real limiter, or a distinguished
/// pass-through (spec.md §4.B, "no-rate-limit configuration").
#[derive(Debug)]
pub enum RateLimiterSlot {
    Unlimited,
    Limited(RateLimiter),
}

impl RateLimiterSlot {
    pub async fn call<T, E, Fut, Op>(&self, sleeper: &dyn Sleeper, mut op: Op) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        match self {
            RateLimiterSlot::Unlimited => op().await,
            RateLimiterSlot::Limited(limiter) => limiter.call(sleeper, op).await,
        }
    }

    /// Admit (sleeping through any `Defer`s) without running a thunk. A
    /// no-rate-limit slot returns immediately without ever calling
    /// `on_defer` (spec.md §4.B, "no-rate-limit configuration").
    pub async fn admit_with_sleep(&self, sleeper: &dyn Sleeper, on_defer: impl FnMut(u64)) {
        if let RateLimiterSlot::Limited(limiter) = self {
            limiter.admit_with_sleep(sleeper, on_defer).await;
        }
    }
}
