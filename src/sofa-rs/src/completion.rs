//! Resolve-once completion primitive.
//!
//! A request can be finished by more than one event: the transport answering,
//! the transport failing, or the task driving it being torn down. Every one of
//! them holds a [`Resolver`]; the first to call [`Resolver::resolve`] decides
//! the outcome and later calls are discarded.

use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Receiving half, awaited by the caller
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
}

/// Sending half, cloned into every event source
pub struct Resolver<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Completion<T> {
    pub fn new() -> (Completion<T>, Resolver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Completion { rx },
            Resolver {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
        )
    }

    /// Wait for the first resolution. `None` if every resolver was dropped unused.
    pub async fn wait(self) -> Option<T> {
        self.rx.await.ok()
    }
}

impl<T> Resolver<T> {
    /// Deliver `value` if nothing has been delivered yet.
    ///
    /// Returns `true` when this call won.
    pub fn resolve(&self, value: T) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            Some(tx) => {
                // The waiter may have given up; the slot is still consumed.
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => slot.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Resolve with `fallback()` when the returned guard drops, unless
    /// something else resolved first.
    pub fn on_drop<F>(&self, fallback: F) -> ResolveOnDrop<T, F>
    where
        F: FnOnce() -> T,
    {
        ResolveOnDrop {
            resolver: self.clone(),
            fallback: Some(fallback),
        }
    }
}

pub struct ResolveOnDrop<T, F: FnOnce() -> T> {
    resolver: Resolver<T>,
    fallback: Option<F>,
}

impl<T, F: FnOnce() -> T> Drop for ResolveOnDrop<T, F> {
    fn drop(&mut self) {
        if self.resolver.is_resolved() {
            return;
        }
        if let Some(fallback) = self.fallback.take() {
            self.resolver.resolve(fallback());
        }
    }
}
