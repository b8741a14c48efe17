//! Convenient re-exports for common fusebox types.
pub use crate::{
    call, call_async, call_stream, call_strict,
    Admission, Backoff, BuildError, CallError, CallHandle, Clock, Entry, Event, EventSink, Fuse,
    FuseOptions, FuseStatus, FuseStrategy, InstantSleeper, LogSink, ManualClock, MemorySink,
    MonotonicClock, MulticastSink, NotFoundError, NullSink, Outcome, RateLimitConfigError,
    RateLimiter, RateLimiterConfig, RateLimiterSlot, Registry, RetryDefaults, RetryDriver,
    RetryPolicy, RetryPolicyBuilder, RetryReason, ServiceId, Sleeper, StartOptions, StartOutcome,
    StreamExit, StreamOptions, StreamOutcome, TokioSleeper, TrackingSleeper,
};
