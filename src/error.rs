//! Error taxonomy for the resilience pipeline (spec.md §7).
//!
//! Grounded on the teacher crate's `error.rs`: a hand-rolled enum with manual
//! `Display`/`Error`/predicate impls rather than a `thiserror` derive — the
//! teacher lists `thiserror` in its manifest but its shipped modules never
//! reach for the derive macro, so this crate follows the code that ships,
//! not the unused manifest line (see DESIGN.md).

use std::fmt;

use crate::ServiceId;

/// The payload carried by [`CallError::RetriesExhausted`].
///
/// The spec names `ReasonUnknown` as "a distinguished" value standing in for
/// a bare `Retry` outcome, not the mere absence of a reason — so this is an
/// enum, not an `Option<R>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason<R> {
    /// The last attempt before exhaustion returned a bare retry signal.
    Unknown,
    /// The last attempt before exhaustion returned `(Retry, reason)`.
    With(R),
}

impl<R> RetryReason<R> {
    pub fn with(self) -> Option<R> {
        match self {
            RetryReason::With(r) => Some(r),
            RetryReason::Unknown => None,
        }
    }
}

impl<R: fmt::Display> fmt::Display for RetryReason<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::Unknown => write!(f, "<unknown>"),
            RetryReason::With(r) => write!(f, "{r}"),
        }
    }
}

/// Unified error returned by [`crate::execute::call`] and friends.
///
/// `E` is the thunk's own raised-error type; `R` is the reason type carried
/// by `Outcome::RetryWith`.
#[derive(Debug)]
pub enum CallError<E, R = ()> {
    /// `start` was never called for this service, or `stop` has been.
    FuseNotFound { service: ServiceId },
    /// The fuse was open at the moment of ask.
    FuseBlown { service: ServiceId },
    /// The retry-delay sequence ended (or expiry elapsed) with the last
    /// attempt returning a retry signal.
    RetriesExhausted { reason: RetryReason<R> },
    /// The thunk raised an error of a class not retried, or retries on a
    /// retriable class were exhausted. The original error, unwrapped.
    Raised(E),
    /// A `call_async` task was aborted or panicked before it could finish.
    /// Not reachable from `call`/`call_strict`, which have no task boundary.
    Cancelled,
}

impl<E: Clone, R: Clone> Clone for CallError<E, R> {
    fn clone(&self) -> Self {
        match self {
            Self::FuseNotFound { service } => Self::FuseNotFound { service: service.clone() },
            Self::FuseBlown { service } => Self::FuseBlown { service: service.clone() },
            Self::RetriesExhausted { reason } => Self::RetriesExhausted { reason: reason.clone() },
            Self::Raised(e) => Self::Raised(e.clone()),
            Self::Cancelled => Self::Cancelled,
        }
    }
}

impl<E: fmt::Display, R: fmt::Display> fmt::Display for CallError<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FuseNotFound { service } => {
                write!(f, "no fuse installed for service {service:?} (start() was never called, or stop() was)")
            }
            Self::FuseBlown { service } => {
                write!(f, "fuse open for service {service:?}")
            }
            Self::RetriesExhausted { reason } => {
                write!(f, "retries exhausted, last reason: {reason}")
            }
            Self::Raised(e) => write!(f, "{e}"),
            Self::Cancelled => write!(f, "call task was cancelled or panicked"),
        }
    }
}

impl<E: std::error::Error + 'static, R: fmt::Debug + 'static> std::error::Error for CallError<E, R> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Raised(e) => Some(e),
            _ => None,
        }
    }
}

impl<E, R> CallError<E, R> {
    pub fn is_fuse_not_found(&self) -> bool {
        matches!(self, Self::FuseNotFound { .. })
    }

    pub fn is_fuse_blown(&self) -> bool {
        matches!(self, Self::FuseBlown { .. })
    }

    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    pub fn is_raised(&self) -> bool {
        matches!(self, Self::Raised(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn into_raised(self) -> Option<E> {
        match self {
            Self::Raised(e) => Some(e),
            _ => None,
        }
    }

    pub fn service(&self) -> Option<&ServiceId> {
        match self {
            Self::FuseNotFound { service } | Self::FuseBlown { service } => Some(service),
            _ => None,
        }
    }
}

/// Returned by [`crate::registry::Registry::stop`] and
/// [`crate::registry::Registry::reset`] when the service was never started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFoundError {
    pub service: ServiceId,
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no fuse installed for service {:?}", self.service)
    }
}

impl std::error::Error for NotFoundError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);

    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for DummyError {}

    #[test]
    fn fuse_blown_display_includes_service() {
        let err: CallError<DummyError> = CallError::FuseBlown { service: "payments".into() };
        assert!(err.to_string().contains("payments"));
        assert!(err.is_fuse_blown());
    }

    #[test]
    fn retries_exhausted_unknown_reason_displays_placeholder() {
        let err: CallError<DummyError, String> =
            CallError::RetriesExhausted { reason: RetryReason::Unknown };
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn retries_exhausted_with_reason_displays_it() {
        let err: CallError<DummyError, String> =
            CallError::RetriesExhausted { reason: RetryReason::With("boom".to_string()) };
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn raised_source_is_inner_error() {
        use std::error::Error;
        let err: CallError<DummyError, ()> = CallError::Raised(DummyError("x"));
        assert_eq!(err.source().unwrap().to_string(), "x");
        assert_eq!(err.into_raised().unwrap().0, "x");
    }

    #[test]
    fn predicates_cover_all_variants() {
        let not_found: CallError<DummyError> = CallError::FuseNotFound { service: "s".into() };
        assert!(not_found.is_fuse_not_found());
        assert_eq!(not_found.service().unwrap().as_str(), "s");

        let cancelled: CallError<DummyError> = CallError::Cancelled;
        assert!(cancelled.is_cancelled());
    }
}
