//! Single-delivery completion callbacks

use parking_lot::Mutex;
use std::sync::Arc;

type Callback<T> = Box<dyn FnOnce(T) + Send>;

enum Slot<T> {
    Pending(Callback<T>),
    Resolved,
}

/// Wraps a completion callback so only the first completion is delivered.
///
/// Clones share the same slot, so a result handler, an exit handler and a
/// send-failure handler can each hold one and race freely; whichever calls
/// [`OnceCallback::complete`] first wins and the rest are dropped.
pub struct OnceCallback<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Clone for OnceCallback<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> OnceCallback<T> {
    pub fn new(callback: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Pending(Box::new(callback)))),
        }
    }

    /// Deliver `value` if nothing was delivered before. Returns whether it was.
    pub fn complete(&self, value: T) -> bool {
        let callback = match std::mem::replace(&mut *self.slot.lock(), Slot::Resolved) {
            Slot::Pending(callback) => callback,
            Slot::Resolved => return false,
        };
        // Run outside the lock so the callback may touch clones of this guard
        callback(value);
        true
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Resolved)
    }
}

impl<T> std::fmt::Debug for OnceCallback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnceCallback")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
