//! The per-service registry (spec.md §3, §4.D).
//!
//! Grounded on the teacher crate's `circuit_breaker_registry.rs`: a
//! `HashMap<ServiceId, Arc<Entry>>` behind a mutex, resolved once per call
//! rather than re-looked-up on every retry attempt, so a concurrent
//! `stop()`/`start()` can't yank the fuse out from under an in-flight retry
//! loop without that loop being able to observe it (spec.md §4.D: "starting
//! a service again with a new configuration must not disrupt calls already
//! in flight").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::error::NotFoundError;
use crate::fuse::{Fuse, FuseOptions};
use crate::rate_limiter::{RateLimiterConfig, RateLimiterSlot};
use crate::retry::RetryDefaults;
use crate::service::ServiceId;
use crate::telemetry::{EventSink, NullSink};

/// Configuration supplied to [`Registry::start`].
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub fuse: FuseOptions,
    pub rate_limit: Option<RateLimiterConfig>,
    pub retry_defaults: RetryDefaults,
    /// Overrides the registry's default sink for this service only. `None`
    /// falls back to whatever sink the `Registry` was built with.
    pub sink: Option<Arc<dyn EventSink>>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            fuse: FuseOptions::default(),
            rate_limit: None,
            retry_defaults: RetryDefaults::default(),
            sink: None,
        }
    }
}

/// What happened when [`Registry::start`] was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// No entry existed for this service; one was installed.
    Installed,
    /// An entry already existed; it was replaced. In-flight calls that
    /// already resolved the old entry keep running against it.
    Replaced,
}

/// One service's resilience state: its fuse, optional rate limiter, and
/// retry defaults.
#[derive(Debug)]
pub struct Entry {
    pub fuse: Fuse,
    pub rate_limiter: RateLimiterSlot,
    pub retry_defaults: RetryDefaults,
    pub sink: Arc<dyn EventSink>,
    /// Set by [`Registry::stop`]/[`Registry::reset`]-via-replace so a call
    /// already holding this `Arc<Entry>` can notice it was removed without
    /// re-resolving the registry map.
    removed: AtomicBool,
}

impl Entry {
    fn new(options: StartOptions, clock: Arc<dyn Clock>, default_sink: Arc<dyn EventSink>) -> Self {
        let rate_limiter = match options.rate_limit {
            Some(config) => {
                RateLimiterSlot::Limited(crate::rate_limiter::RateLimiter::with_clock(config, clock.clone()))
            }
            None => RateLimiterSlot::Unlimited,
        };
        Self {
            fuse: Fuse::with_clock(options.fuse, clock),
            rate_limiter,
            retry_defaults: options.retry_defaults,
            sink: options.sink.unwrap_or(default_sink),
            removed: AtomicBool::new(false),
        }
    }

    /// Whether this specific entry has been removed from the registry since
    /// an in-flight call resolved it.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Inner {
    services: HashMap<ServiceId, Arc<Entry>>,
}

/// Owns every service's fuse, rate limiter, and retry defaults.
///
/// Call [`Registry::start`] once per service at startup (or whenever its
/// configuration changes), then resolve entries through
/// [`crate::execute::call`] and friends.
#[derive(Debug)]
pub struct Registry {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    /// The sink new services pick up unless `StartOptions::sink` overrides
    /// it. A sink subscribes here, at process-init (spec.md §7).
    default_sink: Arc<dyn EventSink>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(crate::clock::MonotonicClock::default()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { inner: Mutex::new(Inner::default()), clock, default_sink: Arc::new(NullSink) }
    }

    /// Like [`Self::with_clock`], but emits every service's events to
    /// `sink` unless a `start` call overrides it per-service.
    pub fn with_clock_and_sink(clock: Arc<dyn Clock>, sink: Arc<dyn EventSink>) -> Self {
        Self { inner: Mutex::new(Inner::default()), clock, default_sink: sink }
    }

    /// Install or replace a service's configuration. Replacing does not
    /// affect calls already holding the previous `Arc<Entry>` beyond marking
    /// it removed is *not* done here — only `stop` marks removal. A `start`
    /// over an existing service is a configuration swap, not a removal.
    pub fn start(&self, service: impl Into<ServiceId>, options: StartOptions) -> StartOutcome {
        let service = service.into();
        let entry = Arc::new(Entry::new(options, self.clock.clone(), self.default_sink.clone()));
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let outcome = if inner.services.contains_key(&service) {
            StartOutcome::Replaced
        } else {
            StartOutcome::Installed
        };
        inner.services.insert(service.clone(), entry);
        tracing::info!(service = %service, outcome = ?outcome, "registry start");
        outcome
    }

    /// Resolve the current entry for a service, for use by
    /// [`crate::execute::call`]. Returns `None` if never started, or
    /// already stopped.
    pub fn lookup(&self, service: &ServiceId) -> Option<Arc<Entry>> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.services.get(service).cloned()
    }

    /// Remove a service's entry. Marks the removed `Arc<Entry>` so any
    /// in-flight call still holding it observes removal on its next ask
    /// (spec.md §4.D).
    pub fn stop(&self, service: &ServiceId) -> Result<(), NotFoundError> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        match inner.services.remove(service) {
            Some(entry) => {
                entry.removed.store(true, Ordering::SeqCst);
                tracing::info!(service = %service, "registry stop");
                Ok(())
            }
            None => Err(NotFoundError { service: service.clone() }),
        }
    }

    /// Reset a service's fuse (and rate limiter window) to a clean slate
    /// without changing its configuration or disturbing other services.
    pub fn reset(&self, service: &ServiceId) -> Result<(), NotFoundError> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        match inner.services.get(service) {
            Some(entry) => {
                entry.fuse.reset();
                tracing::info!(service = %service, "registry reset");
                Ok(())
            }
            None => Err(NotFoundError { service: service.clone() }),
        }
    }

    pub fn is_started(&self, service: &ServiceId) -> bool {
        self.inner.lock().expect("registry mutex poisoned").services.contains_key(service)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn registry() -> Registry {
        Registry::with_clock(Arc::new(ManualClock::new()))
    }

    #[test]
    fn start_installs_then_replaces() {
        let registry = registry();
        assert_eq!(registry.start("payments", StartOptions::default()), StartOutcome::Installed);
        assert_eq!(registry.start("payments", StartOptions::default()), StartOutcome::Replaced);
    }

    #[test]
    fn lookup_returns_none_for_unknown_service() {
        let registry = registry();
        assert!(registry.lookup(&ServiceId::from("ghost")).is_none());
    }

    #[test]
    fn stop_removes_entry_and_marks_it_removed() {
        let registry = registry();
        registry.start("payments", StartOptions::default());
        let entry = registry.lookup(&ServiceId::from("payments")).unwrap();
        assert!(!entry.is_removed());

        registry.stop(&ServiceId::from("payments")).unwrap();
        assert!(entry.is_removed());
        assert!(registry.lookup(&ServiceId::from("payments")).is_none());
    }

    #[test]
    fn stop_unknown_service_returns_not_found() {
        let registry = registry();
        let err = registry.stop(&ServiceId::from("ghost")).unwrap_err();
        assert_eq!(err.service, ServiceId::from("ghost"));
    }

    #[test]
    fn restart_does_not_remove_the_previous_entry_in_flight_calls_are_holding() {
        let registry = registry();
        registry.start("payments", StartOptions::default());
        let old_entry = registry.lookup(&ServiceId::from("payments")).unwrap();

        registry.start("payments", StartOptions::default());
        assert!(!old_entry.is_removed(), "a replace is a config swap, not a removal");
    }

    #[test]
    fn reset_clears_fuse_without_removing_entry() {
        let registry = registry();
        registry.start("payments", StartOptions::default());
        let entry = registry.lookup(&ServiceId::from("payments")).unwrap();
        for _ in 0..20 {
            entry.fuse.melt();
        }
        assert_eq!(entry.fuse.ask(), crate::fuse::FuseStatus::Blown);

        registry.reset(&ServiceId::from("payments")).unwrap();
        assert_eq!(entry.fuse.ask(), crate::fuse::FuseStatus::Ok);
        assert!(registry.is_started(&ServiceId::from("payments")));
    }
}
