//! Change fan-out to registered observers.
//!
//! Observers receive one call per update cycle carrying the full
//! [`ChangeSet`], never one call per key, so reactions can be batched. A
//! panicking observer is caught and logged; a disconnected channel receiver
//! is dropped from the registry. Neither disturbs the other observers or the
//! receive loop.

use crate::core::types::ChangeSet;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Batch change observer.
///
/// Implemented by any `Fn(&ChangeSet) + Send` closure.
pub trait ChangeObserver: Send {
    fn on_changes(&self, changes: &ChangeSet);
}

impl<F> ChangeObserver for F
where
    F: Fn(&ChangeSet) + Send,
{
    fn on_changes(&self, changes: &ChangeSet) {
        self(changes)
    }
}

#[derive(Default)]
struct Registry {
    observers: Vec<Box<dyn ChangeObserver>>,
    channels: Vec<Sender<ChangeSet>>,
}

/// Observer registry with isolated delivery.
#[derive(Default)]
pub struct ChangeNotifier {
    registry: Mutex<Registry>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback observer.
    pub fn add_observer(&self, observer: Box<dyn ChangeObserver>) {
        self.registry.lock().observers.push(observer);
    }

    /// Register a channel observer and return its receiving end.
    ///
    /// The channel is unbounded; a receiver that is dropped is pruned from
    /// the registry on the next delivery.
    pub fn subscribe_channel(&self) -> Receiver<ChangeSet> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.registry.lock().channels.push(tx);
        rx
    }

    /// Deliver a batch to every observer.
    pub fn notify(&self, changes: &ChangeSet) {
        if changes.is_empty() {
            return;
        }

        let mut registry = self.registry.lock();

        for observer in &registry.observers {
            let result = catch_unwind(AssertUnwindSafe(|| observer.on_changes(changes)));
            if result.is_err() {
                log::error!("change observer panicked, continuing with remaining observers");
            }
        }

        registry.channels.retain(|tx| {
            let delivered = tx.send(changes.clone()).is_ok();
            if !delivered {
                log::debug!("change channel disconnected, dropping it");
            }
            delivered
        });
    }
}
