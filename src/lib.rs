#![forbid(unsafe_code)]

//! # fusebox 🔥
//!
//! Per-service resilience pipelines for async Rust: a circuit breaker
//! ("fuse"), a rate limiter, and a retry driver, composed behind one `call`.
//!
//! ## Features
//!
//! - **Fuse**: a sliding-window circuit breaker with lazy refresh and an
//!   optional fault-injection mode.
//! - **Rate limiter**: rolling-window admission pacing with back-pressure
//!   delays.
//! - **Retry driver**: exponential/linear backoff, capping, randomize
//!   jitter, and soft expiry.
//! - **Registry**: one process-wide map from service name to its fuse,
//!   limiter, and retry defaults.
//! - **Async façade**: `call_async` for a single awaitable call,
//!   `call_stream` for bounded-parallelism fan-out.
//! - **Observation hooks**: a pluggable `EventSink` for `fuse_ok`,
//!   `fuse_melt`, `fuse_blown`, and `rate_limited`.
//!
//! ## Quick start
//!
//! ```rust
//! use fusebox::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Registry::new();
//!     registry.start("payments", StartOptions::default());
//!
//!     let policy = RetryPolicyBuilder::<std::io::Error>::new(Backoff::exponential(50))
//!         .cap_ms(2_000)
//!         .expiry_ms(10_000)
//!         .build()
//!         .expect("valid retry policy");
//!
//!     let result: Result<i32, CallError<std::io::Error>> = fusebox::call(
//!         &registry,
//!         &MonotonicClock::default(),
//!         &TokioSleeper,
//!         "payments",
//!         policy,
//!         || async { Ok::<_, std::io::Error>(Outcome::Value(42)) },
//!     )
//!     .await;
//!
//!     assert_eq!(result.unwrap(), 42);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`fuse`]: the per-service circuit breaker.
//! - [`rate_limiter`]: admission pacing per service.
//! - [`retry`]: the backoff/cap/randomize/expiry delay sequence.
//! - [`registry`]: owns every service's fuse, limiter, and retry defaults.
//! - [`execute`]: `call` / `call_strict`, the orchestrator.
//! - [`facade`]: `call_async` / `call_stream`, the async façade.
//! - [`telemetry`]: the `fuse_ok` / `fuse_melt` / `fuse_blown` /
//!   `rate_limited` observation hooks.

mod backoff;
mod clock;
mod error;
mod execute;
mod facade;
mod fuse;
mod rate_limiter;
mod registry;
mod retry;
mod service;
mod sleeper;
mod telemetry;

pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{CallError, NotFoundError, RetryReason};
pub use execute::{call, call_strict};
pub use facade::{call_async, call_stream, CallHandle, StreamExit, StreamOptions, StreamOutcome};
pub use fuse::{Fuse, FuseOptions, FuseStatus, FuseStrategy};
pub use rate_limiter::{Admission, RateLimitConfigError, RateLimiter, RateLimiterConfig, RateLimiterSlot};
pub use registry::{Entry, Registry, StartOptions, StartOutcome};
pub use retry::{BuildError, Outcome, RetryDefaults, RetryDriver, RetryPolicy, RetryPolicyBuilder};
pub use service::ServiceId;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use telemetry::{Event, EventSink, LogSink, MemorySink, MulticastSink, NullSink};

pub mod prelude;
