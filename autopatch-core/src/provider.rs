//! Where desired routing comes from.

use std::sync::{Arc, PoisonError, RwLock};

use autopatch_types::RoutingState;

/// Supplies the desired topology. Polled once per pass, from the scheduler
/// thread, while the pass lock is held.
pub trait RoutingStateProvider: Send + Sync {
    fn snapshot(&self) -> RoutingState;
}

impl<P: RoutingStateProvider + ?Sized> RoutingStateProvider for Arc<P> {
    fn snapshot(&self) -> RoutingState {
        (**self).snapshot()
    }
}

/// A provider backed by a shared, host-updated `RoutingState`.
///
/// Cloning shares the state. The host edits it and then requests a
/// reconcile; the next pass sees the edit.
#[derive(Clone, Default)]
pub struct SharedRoutingState {
    inner: Arc<RwLock<RoutingState>>,
}

impl SharedRoutingState {
    pub fn new(state: RoutingState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Edit the state in place.
    pub fn update<R>(&self, f: impl FnOnce(&mut RoutingState) -> R) -> R {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn set(&self, state: RoutingState) {
        self.update(|current| *current = state);
    }
}

impl RoutingStateProvider for SharedRoutingState {
    fn snapshot(&self) -> RoutingState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
