//! The retry driver (spec.md §3, §4.C).
//!
//! Grounded on the teacher crate's `retry.rs` for the policy/builder split
//! and on `jitter.rs` for the randomize-factor idea, folded directly into
//! this module since spec.md defines exactly one randomize rule (multiply
//! by a uniform factor in `[1.0, 2.0)`) rather than the teacher's four
//! jitter strategies.

use std::sync::Arc;

use rand::Rng;

use crate::backoff::Backoff;

/// What a thunk returns to tell the driver what happened.
///
/// `T` is the success type; `R` is an optional reason carried alongside a
/// retry signal, surfaced later as `RetryReason::With` if retries exhaust.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, R = ()> {
    Value(T),
    Retry,
    RetryWith(R),
}

/// Errors from building a [`RetryPolicy`] (spec.md §8, round-trip property 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    ZeroCap,
    ZeroExpiry,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroCap => write!(f, "cap_ms must be > 0 when set"),
            Self::ZeroExpiry => write!(f, "expiry_ms must be > 0 when set"),
        }
    }
}

impl std::error::Error for BuildError {}

/// Error-agnostic subset of a retry policy: everything except `retry_on`.
///
/// This is what the [`crate::registry::Registry`] stores as a service's
/// default retry configuration, since `retry_on` is typed over a call's own
/// error type `E` and can't be stored type-erased alongside fuse/limiter
/// configuration (spec.md's Open Question on default-retry storage).
#[derive(Debug, Clone)]
pub struct RetryDefaults {
    pub backoff: Backoff,
    pub randomize: bool,
    pub cap_ms: Option<u64>,
    pub expiry_ms: Option<u64>,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self { backoff: Backoff::exponential(100), randomize: false, cap_ms: None, expiry_ms: None }
    }
}

/// A fully-specified retry policy for one call, typed over the thunk's
/// raised-error type `E`.
pub struct RetryPolicy<E> {
    pub backoff: Backoff,
    pub randomize: bool,
    pub cap_ms: Option<u64>,
    pub expiry_ms: Option<u64>,
    /// Whether a raised error of this class should be retried at all. A
    /// thunk's `Err(e)` short-circuits the driver unless this returns `true`.
    pub retry_on: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

// Hand-rolled rather than `#[derive(Clone)]`: the derive would add a spurious
// `E: Clone` bound (`retry_on` clones its `Arc` pointer, not an `E`), which
// would make every policy un-clonable for a non-`Clone` error type — exactly
// the case `call_stream` needs to clone a policy across many items.
impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            backoff: self.backoff,
            randomize: self.randomize,
            cap_ms: self.cap_ms,
            expiry_ms: self.expiry_ms,
            retry_on: self.retry_on.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("backoff", &self.backoff)
            .field("randomize", &self.randomize)
            .field("cap_ms", &self.cap_ms)
            .field("expiry_ms", &self.expiry_ms)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RetryPolicy`], validating `cap_ms`/`expiry_ms` against 0.
pub struct RetryPolicyBuilder<E> {
    backoff: Backoff,
    randomize: bool,
    cap_ms: Option<u64>,
    expiry_ms: Option<u64>,
    retry_on: Option<Arc<dyn Fn(&E) -> bool + Send + Sync>>,
}

impl<E> RetryPolicyBuilder<E> {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff, randomize: false, cap_ms: None, expiry_ms: None, retry_on: None }
    }

    /// Start from a service's stored [`RetryDefaults`], supplying the one
    /// thing the registry can't: `retry_on` for this call's error type.
    pub fn from_defaults(defaults: &RetryDefaults) -> Self {
        Self {
            backoff: defaults.backoff,
            randomize: defaults.randomize,
            cap_ms: defaults.cap_ms,
            expiry_ms: defaults.expiry_ms,
            retry_on: None,
        }
    }

    pub fn randomize(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    pub fn cap_ms(mut self, cap_ms: u64) -> Self {
        self.cap_ms = Some(cap_ms);
        self
    }

    pub fn expiry_ms(mut self, expiry_ms: u64) -> Self {
        self.expiry_ms = Some(expiry_ms);
        self
    }

    pub fn retry_on(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retry_on = Some(Arc::new(predicate));
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, BuildError> {
        if self.cap_ms == Some(0) {
            return Err(BuildError::ZeroCap);
        }
        if self.expiry_ms == Some(0) {
            return Err(BuildError::ZeroExpiry);
        }
        Ok(RetryPolicy {
            backoff: self.backoff,
            randomize: self.randomize,
            cap_ms: self.cap_ms,
            expiry_ms: self.expiry_ms,
            retry_on: self.retry_on.unwrap_or_else(|| Arc::new(|_| true)),
        })
    }
}

/// Drives the delay sequence for one in-flight call. Owned by a single
/// `call()` invocation — never shared, so it needs no synchronization
/// (spec.md §4.D).
pub struct RetryDriver<E> {
    policy: RetryPolicy<E>,
    attempt: u64,
    start_ms: u64,
}

impl<E> RetryDriver<E> {
    pub fn new(policy: RetryPolicy<E>, start_ms: u64) -> Self {
        Self { policy, attempt: 0, start_ms }
    }

    pub fn policy(&self) -> &RetryPolicy<E> {
        &self.policy
    }

    /// Whether `error` belongs to a retriable class.
    pub fn should_retry(&self, error: &E) -> bool {
        (self.policy.retry_on)(error)
    }

    /// The delay before the next attempt, or `None` if the sequence is over
    /// (expiry already elapsed). `now_ms` must be non-decreasing across
    /// calls. Truncates an individual sleep that would cross `expiry_ms`
    /// rather than skip it outright (spec.md §4.C / §5).
    pub fn next_delay(&mut self, now_ms: u64) -> Option<u64> {
        let elapsed = now_ms.saturating_sub(self.start_ms);

        if let Some(expiry_ms) = self.policy.expiry_ms {
            if elapsed >= expiry_ms {
                return None;
            }
        }

        let n = self.attempt;
        self.attempt += 1;

        let mut delay = self.policy.backoff.delay_ms(n);

        if let Some(cap_ms) = self.policy.cap_ms {
            delay = delay.min(cap_ms);
        }

        if self.policy.randomize {
            let factor = rand::rng().random_range(1.0..2.0);
            delay = ((delay as f64) * factor) as u64;
        }

        if let Some(expiry_ms) = self.policy.expiry_ms {
            let remaining = expiry_ms.saturating_sub(elapsed);
            delay = delay.min(remaining);
        }

        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rejects_zero_cap_and_zero_expiry() {
        let err = RetryPolicyBuilder::<&'static str>::new(Backoff::exponential(10))
            .cap_ms(0)
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::ZeroCap);

        let err = RetryPolicyBuilder::<&'static str>::new(Backoff::exponential(10))
            .expiry_ms(0)
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::ZeroExpiry);
    }

    #[test]
    fn default_policy_retries_everything() {
        let policy = RetryPolicyBuilder::<&'static str>::new(Backoff::exponential(10)).build().unwrap();
        assert!((policy.retry_on)(&"anything"));
    }

    #[test]
    fn uncapped_sequence_follows_backoff_exactly() {
        let policy = RetryPolicyBuilder::<&'static str>::new(Backoff::exponential(100))
            .retry_on(|_| true)
            .build()
            .unwrap();
        let mut driver = RetryDriver::new(policy, 0);
        assert_eq!(driver.next_delay(0), Some(100));
        assert_eq!(driver.next_delay(100), Some(200));
        assert_eq!(driver.next_delay(300), Some(400));
    }

    #[test]
    fn cap_bounds_every_delay() {
        let policy = RetryPolicyBuilder::<&'static str>::new(Backoff::exponential(100))
            .cap_ms(250)
            .build()
            .unwrap();
        let mut driver = RetryDriver::new(policy, 0);
        assert_eq!(driver.next_delay(0), Some(100));
        assert_eq!(driver.next_delay(100), Some(200));
        assert_eq!(driver.next_delay(300), Some(250));
        assert_eq!(driver.next_delay(550), Some(250));
    }

    #[test]
    fn randomize_keeps_delay_within_one_to_two_times_base() {
        let policy = RetryPolicyBuilder::<&'static str>::new(Backoff::exponential(1_000))
            .randomize(true)
            .build()
            .unwrap();
        let mut driver = RetryDriver::new(policy, 0);
        let d = driver.next_delay(0).unwrap();
        assert!(d >= 1_000 && d < 2_000, "delay {d} out of randomize bounds");
    }

    #[test]
    fn expiry_stops_sequence_once_elapsed_reaches_it() {
        let policy = RetryPolicyBuilder::<&'static str>::new(Backoff::exponential(100))
            .expiry_ms(150)
            .build()
            .unwrap();
        let mut driver = RetryDriver::new(policy, 0);
        assert_eq!(driver.next_delay(0), Some(100));
        assert_eq!(driver.next_delay(200), None);
    }

    #[test]
    fn expiry_truncates_a_delay_that_would_cross_the_boundary() {
        let policy = RetryPolicyBuilder::<&'static str>::new(Backoff::exponential(100))
            .expiry_ms(350)
            .build()
            .unwrap();
        let mut driver = RetryDriver::new(policy, 0);
        assert_eq!(driver.next_delay(0), Some(100));
        // elapsed = 100, raw delay = 200, remaining to expiry = 250 -> unclipped
        assert_eq!(driver.next_delay(100), Some(200));
        // elapsed = 300, raw delay = 400, remaining to expiry = 50 -> clipped
        assert_eq!(driver.next_delay(300), Some(50));
    }

    #[test]
    fn should_retry_delegates_to_predicate() {
        let policy = RetryPolicyBuilder::<&'static str>::new(Backoff::exponential(10))
            .retry_on(|e: &&'static str| *e == "transient")
            .build()
            .unwrap();
        let driver = RetryDriver::new(policy, 0);
        assert!(driver.should_retry(&"transient"));
        assert!(!driver.should_retry(&"fatal"));
    }

    #[test]
    fn from_defaults_carries_registry_configuration_forward() {
        let defaults = RetryDefaults {
            backoff: Backoff::exponential(50),
            randomize: true,
            cap_ms: Some(500),
            expiry_ms: Some(5_000),
        };
        let policy = RetryPolicyBuilder::<&'static str>::from_defaults(&defaults).build().unwrap();
        assert_eq!(policy.cap_ms, Some(500));
        assert_eq!(policy.expiry_ms, Some(5_000));
        assert!(policy.randomize);
    }
}
