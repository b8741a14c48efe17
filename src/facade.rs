//! The async façade (spec.md §4.F): `call` as a single awaitable future, and
//! a bounded-parallelism stream over many inputs.
//!
//! Grounded on the teacher crate's `bulkhead.rs`, which spawns each guarded
//! operation on its own `tokio::spawn` task specifically so a panicking
//! operation surfaces as a `JoinError` for that caller rather than poisoning
//! whatever combinator is driving several of them at once — the same
//! mechanism this module uses for `call_stream`'s per-item isolation
//! (spec.md §5, "a panic in a stream worker is reported per-item and does
//! not abort other workers").

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};

use crate::clock::Clock;
use crate::error::CallError;
use crate::registry::Registry;
use crate::retry::{Outcome, RetryPolicy};
use crate::service::ServiceId;
use crate::sleeper::Sleeper;

/// A handle to a [`crate::execute::call`] running on a background task.
///
/// Awaiting it yields the same `Result<T, CallError<E, R>>` `call` itself
/// would have produced, except that a task abort or panic surfaces as
/// [`CallError::Cancelled`] instead of propagating the panic into the
/// awaiter (spec.md §5, cancellation).
pub struct CallHandle<T, E, R> {
    join: tokio::task::JoinHandle<Result<T, CallError<E, R>>>,
}

impl<T, E, R> Future for CallHandle<T, E, R> {
    type Output = Result<T, CallError<E, R>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.join).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_join_error)) => Poll::Ready(Err(CallError::Cancelled)),
        }
    }
}

impl<T, E, R> CallHandle<T, E, R> {
    /// Abort the background task. The in-flight `call` is not given a
    /// chance to run any more of its own cleanup; a subsequent `.await`
    /// resolves to `CallError::Cancelled`.
    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Schedule [`crate::execute::call`] on a background task and return a
/// handle awaitable for the eventual value or error (spec.md §4.F).
pub fn call_async<T, E, R, Fut, Thunk>(
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    service: impl Into<ServiceId>,
    policy: RetryPolicy<E>,
    thunk: Thunk,
) -> CallHandle<T, E, R>
where
    T: Send + 'static,
    E: Send + 'static,
    R: Send + 'static,
    Fut: Future<Output = Result<Outcome<T, R>, E>> + Send + 'static,
    Thunk: FnMut() -> Fut + Send + 'static,
{
    let service = service.into();
    let join = tokio::spawn(async move {
        crate::execute::call(&registry, clock.as_ref(), sleeper.as_ref(), service, policy, thunk).await
    });
    CallHandle { join }
}

/// Options for [`call_stream`] (spec.md §4.F).
pub struct StreamOptions<E> {
    /// Upper bound on in-flight calls. Defaults to the number of available
    /// parallelism units (spec.md §4.F).
    pub max_concurrency: Option<usize>,
    /// Per-item hard timeout. Unlike `expiry_ms` (a soft budget honored by
    /// the retry driver between attempts), this aborts the whole call —
    /// including a thunk blocked mid-attempt — the instant it elapses.
    pub timeout_ms: Option<u64>,
    /// Overrides the `policy` argument to `call_stream` for every item.
    ///
    /// Open question from spec.md §9: the source accepts a retry policy
    /// either as `call_stream`'s own `policy` argument or nested inside its
    /// options argument, without specifying which wins when both are given.
    /// This crate resolves it explicitly: when set, `retry_policy_override`
    /// always wins over the positional `policy` argument. See DESIGN.md.
    pub retry_policy_override: Option<RetryPolicy<E>>,
}

impl<E> Default for StreamOptions<E> {
    fn default() -> Self {
        Self { max_concurrency: None, timeout_ms: None, retry_policy_override: None }
    }
}

/// Why a `call_stream` item did not produce a value.
#[derive(Debug)]
pub enum StreamExit<E, R> {
    /// The call itself failed (fuse blown/not-found, retries exhausted, or
    /// a non-retriable raise).
    Error(CallError<E, R>),
    /// The per-item `timeout_ms` elapsed before the call finished; the
    /// underlying task has been aborted.
    TimedOut,
    /// The call's task panicked (spec.md §5: "reported per-item and does
    /// not abort other workers").
    Panicked,
}

impl<E, R> std::fmt::Display for StreamExit<E, R>
where
    E: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamExit::Error(e) => write!(f, "{e}"),
            StreamExit::TimedOut => write!(f, "timed out"),
            StreamExit::Panicked => write!(f, "panicked"),
        }
    }
}

/// One item's result from [`call_stream`].
#[derive(Debug)]
pub enum StreamOutcome<T, E, R> {
    Ok(T),
    Exited(StreamExit<E, R>),
}

/// Run up to `stream_opts.max_concurrency` calls in parallel over `inputs`,
/// yielding one [`StreamOutcome`] per input *in input order* (spec.md §4.F,
/// §5 "stream output preserves input order").
///
/// `map_thunk` turns one input into the thunk closure that drives every
/// attempt for that input's call — built fresh per item, the same way a
/// caller would build a per-request thunk outside a stream.
///
/// Backpressure: inputs are pulled lazily, only as fast as the returned
/// stream is consumed (spec.md §4.F).
pub fn call_stream<I, T, E, R, Fut, Thunk, MapThunk>(
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    inputs: impl IntoIterator<Item = I> + Send + 'static,
    service: impl Into<ServiceId>,
    policy: RetryPolicy<E>,
    stream_opts: StreamOptions<E>,
    map_thunk: MapThunk,
) -> impl Stream<Item = StreamOutcome<T, E, R>>
where
    I: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    R: Send + 'static,
    Fut: Future<Output = Result<Outcome<T, R>, E>> + Send + 'static,
    Thunk: FnMut() -> Fut + Send + 'static,
    MapThunk: Fn(I) -> Thunk + Send + Sync + 'static,
{
    let service = service.into();
    let max_concurrency = stream_opts.max_concurrency.unwrap_or_else(|| {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    });
    let timeout_ms = stream_opts.timeout_ms;
    let effective_policy = stream_opts.retry_policy_override.unwrap_or(policy);
    let map_thunk = Arc::new(map_thunk);

    stream::iter(inputs.into_iter())
        .map(move |item| {
            let registry = registry.clone();
            let clock = clock.clone();
            let sleeper = sleeper.clone();
            let service = service.clone();
            let policy = effective_policy.clone();
            let map_thunk = map_thunk.clone();
            async move {
                let thunk = map_thunk(item);
                let join = tokio::spawn(async move {
                    crate::execute::call(
                        &registry,
                        clock.as_ref(),
                        sleeper.as_ref(),
                        service,
                        policy,
                        thunk,
                    )
                    .await
                });
                let abort_handle = join.abort_handle();

                let joined = match timeout_ms {
                    Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), join).await {
                        Ok(joined) => joined,
                        Err(_elapsed) => {
                            abort_handle.abort();
                            return StreamOutcome::Exited(StreamExit::TimedOut);
                        }
                    },
                    None => join.await,
                };

                match joined {
                    Ok(Ok(value)) => StreamOutcome::Ok(value),
                    Ok(Err(call_error)) => StreamOutcome::Exited(StreamExit::Error(call_error)),
                    Err(join_error) if join_error.is_panic() => {
                        StreamOutcome::Exited(StreamExit::Panicked)
                    }
                    Err(_cancelled) => StreamOutcome::Exited(StreamExit::Error(CallError::Cancelled)),
                }
            }
        })
        .buffered(max_concurrency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::Backoff;
    use crate::clock::MonotonicClock;
    use crate::registry::{Registry, StartOptions};
    use crate::retry::RetryPolicyBuilder;
    use crate::sleeper::InstantSleeper;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy() -> RetryPolicy<&'static str> {
        RetryPolicyBuilder::new(Backoff::exponential(1)).retry_on(|_| true).build().unwrap()
    }

    #[tokio::test]
    async fn call_async_resolves_to_the_thunks_value() {
        let registry = Arc::new(Registry::new());
        registry.start("svc", StartOptions::default());

        let handle = call_async(
            registry,
            Arc::new(MonotonicClock::default()),
            Arc::new(InstantSleeper),
            "svc",
            policy(),
            || async { Ok::<_, &'static str>(Outcome::Value(7)) },
        );

        assert_eq!(handle.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn call_async_surfaces_fuse_not_found() {
        let registry = Arc::new(Registry::new());

        let handle = call_async(
            registry,
            Arc::new(MonotonicClock::default()),
            Arc::new(InstantSleeper),
            "ghost",
            policy(),
            || async { Ok::<_, &'static str>(Outcome::Value(1)) },
        );

        assert!(handle.await.unwrap_err().is_fuse_not_found());
    }

    #[tokio::test]
    async fn call_stream_preserves_input_order() {
        let registry = Arc::new(Registry::new());
        registry.start("svc", StartOptions::default());

        let inputs = vec![1, 2, 3, 4, 5];
        let results: Vec<_> = call_stream(
            registry,
            Arc::new(MonotonicClock::default()),
            Arc::new(InstantSleeper),
            inputs,
            "svc",
            policy(),
            StreamOptions::default(),
            |n: i32| move || {
                let n = n;
                async move { Ok::<Outcome<i32, ()>, &'static str>(Outcome::Value(n * 10)) }
            },
        )
        .collect()
        .await;

        let values: Vec<i32> = results
            .into_iter()
            .map(|outcome| match outcome {
                StreamOutcome::Ok(v) => v,
                StreamOutcome::Exited(_) => panic!("expected every item to succeed"),
            })
            .collect();
        assert_eq!(values, vec![10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn call_stream_reports_fuse_not_found_per_item_without_aborting_others() {
        let registry = Arc::new(Registry::new());
        // deliberately never started

        let inputs = vec![1, 2, 3];
        let results: Vec<_> = call_stream(
            registry,
            Arc::new(MonotonicClock::default()),
            Arc::new(InstantSleeper),
            inputs,
            "ghost",
            policy(),
            StreamOptions::default(),
            |n: i32| move || async move { Ok::<Outcome<i32, ()>, &'static str>(Outcome::Value(n)) },
        )
        .collect()
        .await;

        assert_eq!(results.len(), 3);
        for outcome in results {
            match outcome {
                StreamOutcome::Exited(StreamExit::Error(e)) => assert!(e.is_fuse_not_found()),
                other => panic!("expected FuseNotFound for every item, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn call_stream_respects_max_concurrency() {
        let registry = Arc::new(Registry::new());
        registry.start("svc", StartOptions::default());

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let inputs: Vec<i32> = (0..10).collect();
        let in_flight_for_map = in_flight.clone();
        let max_observed_for_map = max_observed.clone();

        let results: Vec<_> = call_stream(
            registry,
            Arc::new(MonotonicClock::default()),
            Arc::new(InstantSleeper),
            inputs,
            "svc",
            policy(),
            StreamOptions { max_concurrency: Some(2), ..Default::default() },
            move |n: i32| {
                let in_flight = in_flight_for_map.clone();
                let max_observed = max_observed_for_map.clone();
                move || {
                    let in_flight = in_flight.clone();
                    let max_observed = max_observed.clone();
                    async move {
                        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_observed.fetch_max(current, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<Outcome<i32, ()>, &'static str>(Outcome::Value(n))
                    }
                }
            },
        )
        .collect()
        .await;

        assert_eq!(results.len(), 10);
        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }
}

