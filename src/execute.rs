//! The call orchestrator (spec.md §4.E): fuse ask, rate-limit admission,
//! thunk invocation, retry-on-signal, melt-on-failure, in that order.
//!
//! Grounded on the teacher crate's `stack.rs`, which composed circuit
//! breaker + bulkhead + timeout + retry as nested async closures; this
//! module keeps that "one function drives the whole pipeline" shape but
//! follows spec.md's own ordering contract rather than the teacher's layer
//! stack, and resolves the registry entry once per call rather than per
//! attempt (spec.md §4.D).

use std::future::Future;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{CallError, RetryReason};
use crate::fuse::FuseStatus;
use crate::registry::Registry;
use crate::retry::{Outcome, RetryDriver, RetryPolicy};
use crate::service::ServiceId;
use crate::sleeper::Sleeper;
use crate::telemetry::Event;

/// Run `thunk` against `service`'s fuse, rate limiter, and the given retry
/// policy.
///
/// `thunk` receives nothing and returns `Result<Outcome<T, R>, E>` each
/// attempt: `Ok(Outcome::Value(v))` to finish, `Ok(Outcome::Retry)` /
/// `Ok(Outcome::RetryWith(r))` to ask for another attempt, or `Err(e)` to
/// raise (subject to `policy.retry_on`).
pub async fn call<T, E, R, Fut, Thunk>(
    registry: &Registry,
    clock: &dyn Clock,
    sleeper: &dyn Sleeper,
    service: impl Into<ServiceId>,
    policy: RetryPolicy<E>,
    mut thunk: Thunk,
) -> Result<T, CallError<E, R>>
where
    Fut: Future<Output = Result<Outcome<T, R>, E>>,
    Thunk: FnMut() -> Fut,
{
    let service = service.into();
    let entry = registry.lookup(&service).ok_or_else(|| {
        tracing::error!(service = %service, "call: no fuse installed (start() never called, or stop() was)");
        CallError::FuseNotFound { service: service.clone() }
    })?;

    let start_ms = clock.now_millis();
    let mut driver = RetryDriver::new(policy, start_ms);

    loop {
        if entry.is_removed() {
            tracing::error!(service = %service, "call: fuse removed mid-flight (stop() called concurrently)");
            return Err(CallError::FuseNotFound { service: service.clone() });
        }

        if entry.fuse.ask() == FuseStatus::Blown {
            entry.sink.emit(Event::FuseBlown { service: service.clone() });
            return Err(CallError::FuseBlown { service: service.clone() });
        }
        entry.sink.emit(Event::FuseOk { service: service.clone() });

        entry
            .rate_limiter
            .admit_with_sleep(sleeper, |delay_ms| {
                entry.sink.emit(Event::RateLimited { service: service.clone(), delay_ms });
            })
            .await;
        let attempt_result = thunk().await;

        match attempt_result {
            Ok(Outcome::Value(value)) => return Ok(value),
            Ok(Outcome::Retry) => {
                entry.fuse.melt();
                entry.sink.emit(Event::FuseMelt { service: service.clone() });
                let now = clock.now_millis();
                match driver.next_delay(now) {
                    Some(delay) => {
                        if delay > 0 {
                            sleeper.sleep(std::time::Duration::from_millis(delay)).await;
                        }
                    }
                    None => {
                        return Err(CallError::RetriesExhausted { reason: RetryReason::Unknown });
                    }
                }
            }
            Ok(Outcome::RetryWith(reason)) => {
                entry.fuse.melt();
                entry.sink.emit(Event::FuseMelt { service: service.clone() });
                let now = clock.now_millis();
                match driver.next_delay(now) {
                    Some(delay) => {
                        if delay > 0 {
                            sleeper.sleep(std::time::Duration::from_millis(delay)).await;
                        }
                    }
                    None => {
                        return Err(CallError::RetriesExhausted { reason: RetryReason::With(reason) });
                    }
                }
            }
            Err(error) => {
                entry.fuse.melt();
                entry.sink.emit(Event::FuseMelt { service: service.clone() });
                if !driver.should_retry(&error) {
                    return Err(CallError::Raised(error));
                }
                let now = clock.now_millis();
                match driver.next_delay(now) {
                    Some(delay) => {
                        if delay > 0 {
                            sleeper.sleep(std::time::Duration::from_millis(delay)).await;
                        }
                    }
                    None => {
                        return Err(CallError::Raised(error));
                    }
                }
            }
        }
    }
}

/// Like [`call`], but panics instead of returning the three structural
/// variants of [`CallError`] (`FuseNotFound`, `FuseBlown`,
/// `RetriesExhausted`), reserving `Result::Err` for the thunk's own raised
/// error. This is the idiomatic-Rust reading of "raise all four as typed
/// exceptions": Rust has no exception channel, so the three pipeline-level
/// failures become panics and only the thunk's own error travels through
/// `Result`.
pub async fn call_strict<T, E, R, Fut, Thunk>(
    registry: &Registry,
    clock: &dyn Clock,
    sleeper: &dyn Sleeper,
    service: impl Into<ServiceId>,
    policy: RetryPolicy<E>,
    thunk: Thunk,
) -> Result<T, E>
where
    E: std::fmt::Debug + Send + 'static,
    R: std::fmt::Debug + Send + 'static,
    Fut: Future<Output = Result<Outcome<T, R>, E>>,
    Thunk: FnMut() -> Fut,
{
    match call(registry, clock, sleeper, service, policy, thunk).await {
        Ok(value) => Ok(value),
        Err(CallError::Raised(e)) => Err(e),
        Err(other @ CallError::FuseNotFound { .. }) => std::panic::panic_any(other),
        Err(other @ CallError::FuseBlown { .. }) => std::panic::panic_any(other),
        Err(other @ CallError::RetriesExhausted { .. }) => std::panic::panic_any(other),
        Err(other @ CallError::Cancelled) => std::panic::panic_any(other),
    }
}
