//! Opaque handles for filters owned on behalf of a host
//!
//! Hosts that only pass integers across their plugin boundary hold a
//! [`FilterHandle`]; the registry keeps the filter alive until it is removed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::filter::Filter;

/// Opaque, never-zero handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterHandle(u64);

impl FilterHandle {
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Concurrent map from handle to owned instance
pub struct HandleRegistry<T = Filter> {
    entries: DashMap<u64, Arc<T>>,
    next: AtomicU64,
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }

    pub fn insert(&self, value: T) -> FilterHandle {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(raw, Arc::new(value));
        FilterHandle(raw)
    }

    pub fn get(&self, handle: FilterHandle) -> Option<Arc<T>> {
        self.entries.get(&handle.0).map(|entry| entry.value().clone())
    }

    /// Forget `handle`. Callers still holding the `Arc` keep the value alive.
    pub fn remove(&self, handle: FilterHandle) -> Option<Arc<T>> {
        self.entries.remove(&handle.0).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
