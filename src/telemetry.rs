//! Observation hooks the core emits, independent of whether a sink is
//! attached (spec.md §7, "Observation hooks").
//!
//! Grounded on the teacher crate's `telemetry.rs`: the same sink-naming
//! scheme (`NullSink`, `LogSink`, `MemorySink`, `MulticastSink`) and the same
//! "best effort, never fails the caller" philosophy. The shape differs from
//! the teacher's `tower::Service<PolicyEvent>`-based `TelemetrySink`: a
//! [`Fuse`](crate::fuse::Fuse) and [`RateLimiter`](crate::rate_limiter::RateLimiter)
//! are shared behind an `Arc` across arbitrarily many concurrent callers and
//! can only hand out `&self`, but `tower::Service::call` takes `&mut self` —
//! not object-safe for a single shared sink instance. `EventSink::emit` is
//! synchronous and takes `&self` instead, which is both object-safe and a
//! closer match to "the core never fails because no sink is attached" (a
//! fallible async send would need somewhere to put the failure). See
//! DESIGN.md.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::service::ServiceId;

/// One of the four named events the core emits (spec.md §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `ask` observed the fuse as Ok.
    FuseOk { service: ServiceId },
    /// `melt` recorded a failure.
    FuseMelt { service: ServiceId },
    /// `ask` observed the fuse as Blown (real or fault-injected).
    FuseBlown { service: ServiceId },
    /// The rate limiter deferred an admission.
    RateLimited { service: ServiceId, delay_ms: u64 },
}

impl Event {
    pub fn service(&self) -> &ServiceId {
        match self {
            Event::FuseOk { service }
            | Event::FuseMelt { service }
            | Event::FuseBlown { service }
            | Event::RateLimited { service, .. } => service,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::FuseOk { service } => write!(f, "fuse_ok({service})"),
            Event::FuseMelt { service } => write!(f, "fuse_melt({service})"),
            Event::FuseBlown { service } => write!(f, "fuse_blown({service})"),
            Event::RateLimited { service, delay_ms } => {
                write!(f, "rate_limited({service}, {delay_ms}ms)")
            }
        }
    }
}

/// A sink that consumes [`Event`]s. A sink may subscribe at process-init;
/// the core never fails because no sink is attached (spec.md §7).
pub trait EventSink: Send + Sync + fmt::Debug {
    fn emit(&self, event: Event);
}

/// The default sink: drops every event. Matches the teacher's `NullSink`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Forwards every event to `tracing` at an appropriate level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: Event) {
        match &event {
            Event::FuseOk { service } => tracing::trace!(%service, "fuse_ok"),
            Event::FuseMelt { service } => tracing::debug!(%service, "fuse_melt"),
            Event::FuseBlown { service } => tracing::warn!(%service, "fuse_blown"),
            Event::RateLimited { service, delay_ms } => {
                tracing::debug!(%service, delay_ms, "rate_limited")
            }
        }
    }
}

/// Collects every event in memory. Useful in tests that assert on which
/// hooks fired and in what order, the way the teacher's `MemorySink` is used
/// in its own policy tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("MemorySink mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("MemorySink mutex poisoned").len()
    }

    pub fn clear(&self) {
        self.events.lock().expect("MemorySink mutex poisoned").clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(event);
    }
}

/// Fans one event out to every sink in the list, matching the teacher's
/// `MulticastSink` (generalized here from a fixed two-sink pair to a `Vec`,
/// since the core has no reason to cap the fan-out at two).
#[derive(Debug, Clone, Default)]
pub struct MulticastSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MulticastSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for MulticastSink {
    fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_drops_everything() {
        let sink = NullSink;
        sink.emit(Event::FuseBlown { service: "svc".into() });
        // nothing to assert beyond "it didn't panic"
    }

    #[test]
    fn memory_sink_records_events_in_order() {
        let sink = MemorySink::new();
        sink.emit(Event::FuseOk { service: "svc".into() });
        sink.emit(Event::FuseMelt { service: "svc".into() });
        assert_eq!(sink.count(), 2);
        assert_eq!(sink.events()[0], Event::FuseOk { service: "svc".into() });
        assert_eq!(sink.events()[1], Event::FuseMelt { service: "svc".into() });
    }

    #[test]
    fn memory_sink_can_clear() {
        let sink = MemorySink::new();
        sink.emit(Event::FuseOk { service: "svc".into() });
        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn multicast_forwards_to_every_sink() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let multicast = MulticastSink::new(vec![a.clone(), b.clone()]);
        multicast.emit(Event::RateLimited { service: "svc".into(), delay_ms: 5 });
        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 1);
    }
}
