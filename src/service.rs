//! The service identifier: the primary key into the [`crate::registry::Registry`].

use std::fmt;
use std::sync::Arc;

/// Opaque identifier for one logically distinct external dependency.
///
/// Cheaply cloneable (an `Arc<str>` under the hood) since a copy travels with
/// every in-flight call and shows up in `CallError` variants.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ServiceId(Arc<str>);

impl ServiceId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<&str> for ServiceId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ServiceId {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&ServiceId> for ServiceId {
    fn from(id: &ServiceId) -> Self {
        id.clone()
    }
}
