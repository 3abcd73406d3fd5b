// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Concurrency-safe append-and-remove lists of callbacks.

use std::sync::{Arc, Mutex, Weak};

use crate::control_packet::Publish;
use crate::session::ack::AckToken;
use crate::session::{ConnectedEvent, DisconnectedEvent, SessionError};

/// Callback invoked for every incoming PUBLISH.
pub(crate) type MessageHandlerFn = Arc<dyn Fn(Publish, AckToken) + Send + Sync>;
/// Callback invoked on every successful connect.
pub(crate) type ConnectObserverFn = Arc<dyn Fn(&ConnectedEvent) + Send + Sync>;
/// Callback invoked on every disconnect.
pub(crate) type DisconnectObserverFn = Arc<dyn Fn(&DisconnectedEvent) + Send + Sync>;
/// Callback invoked once if the client terminates with a fatal error.
pub(crate) type FatalErrorObserverFn = Arc<dyn Fn(&SessionError) + Send + Sync>;

struct RegistryInner<T> {
    next_id: u64,
    entries: Vec<(u64, T)>,
}

/// Append-and-remove list of callbacks.
///
/// Iteration via [`snapshot`](HandlerRegistry::snapshot) sees exactly the set
/// of callbacks present at the time of the call, in registration order,
/// regardless of concurrent registration or removal.
pub(crate) struct HandlerRegistry<T> {
    inner: Arc<Mutex<RegistryInner<T>>>,
}

// Manual impl: `#[derive(Clone)]` would require `T: Clone`
impl<T> Clone for HandlerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> HandlerRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Append a callback, returning its removal handle.
    pub(crate) fn register(&self, callback: T) -> Registration {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.entries.push((id, callback));
            id
        };
        let weak: Weak<Mutex<RegistryInner<T>>> = Arc::downgrade(&self.inner);
        Registration {
            remove: Mutex::new(Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .lock()
                        .unwrap()
                        .entries
                        .retain(|(entry_id, _)| *entry_id != id);
                }
            }))),
        }
    }

    /// Return the callbacks registered at this moment, in registration order.
    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect()
    }
}

/// Removal handle for a registered callback or observer.
///
/// Dropping the handle does not remove the registration; call
/// [`remove`](Registration::remove), which is idempotent.
pub struct Registration {
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Registration {
    /// Remove the registered callback. Subsequent calls are no-ops.
    pub fn remove(&self) {
        if let Some(remove) = self.remove.lock().unwrap().take() {
            remove();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_registry() -> HandlerRegistry<Arc<dyn Fn() -> &'static str + Send + Sync>> {
        HandlerRegistry::new()
    }

    fn run_all(
        registry: &HandlerRegistry<Arc<dyn Fn() -> &'static str + Send + Sync>>,
    ) -> Vec<&'static str> {
        registry.snapshot().iter().map(|f| f()).collect()
    }

    #[test]
    fn snapshot_in_registration_order() {
        let registry = collecting_registry();
        let _r1 = registry.register(Arc::new(|| "first"));
        let _r2 = registry.register(Arc::new(|| "second"));
        let _r3 = registry.register(Arc::new(|| "third"));
        assert_eq!(run_all(&registry), vec!["first", "second", "third"]);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = collecting_registry();
        let _r1 = registry.register(Arc::new(|| "first"));
        let r2 = registry.register(Arc::new(|| "second"));
        r2.remove();
        r2.remove();
        assert_eq!(run_all(&registry), vec!["first"]);
    }

    #[test]
    fn remove_does_not_disturb_other_entries() {
        let registry = collecting_registry();
        let _r1 = registry.register(Arc::new(|| "first"));
        let r2 = registry.register(Arc::new(|| "second"));
        let _r3 = registry.register(Arc::new(|| "third"));
        r2.remove();
        assert_eq!(run_all(&registry), vec!["first", "third"]);
    }

    #[test]
    fn snapshot_is_stable_against_later_mutation() {
        let registry = collecting_registry();
        let r1 = registry.register(Arc::new(|| "first"));
        let snapshot = registry.snapshot();
        r1.remove();
        let _r2 = registry.register(Arc::new(|| "second"));
        // The earlier snapshot still sees exactly the handlers present when taken
        assert_eq!(snapshot.iter().map(|f| f()).collect::<Vec<_>>(), vec!["first"]);
        assert_eq!(run_all(&registry), vec!["second"]);
    }

    #[test]
    fn drop_without_remove_keeps_registration() {
        let registry = collecting_registry();
        {
            let _registration = registry.register(Arc::new(|| "kept"));
        }
        assert_eq!(run_all(&registry), vec!["kept"]);
    }
}
