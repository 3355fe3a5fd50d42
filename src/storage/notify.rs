//! Change notification owned by the store
//!
//! Listeners are parameterless: on every notification they re-read the store
//! snapshot. There is no per-field diffing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Listener>>,
}

/// Observer list for store changes
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    registry: Arc<Registry>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until the returned handle is
    /// dropped or [`ChangeSubscription::unsubscribe`] is called.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn subscribe<F>(&self, listener: F) -> ChangeSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(listener));
        ChangeSubscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invoke every listener once.
    pub fn notify(&self) {
        // Listeners run outside the lock so they may subscribe or unsubscribe
        let listeners: Vec<Listener> = self
            .registry
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn clear(&self) {
        self.registry
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Handle returned by [`ChangeNotifier::subscribe`]
pub struct ChangeSubscription {
    id: u64,
    registry: Weak<Registry>,
}

impl ChangeSubscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .listeners
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_reaches_all_listeners() {
        let notifier = ChangeNotifier::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let a = {
            let hits = hits.clone();
            notifier.subscribe(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let b = {
            let hits = hits.clone();
            notifier.subscribe(move || {
                hits.fetch_add(10, Ordering::SeqCst);
            })
        };

        notifier.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        a.unsubscribe();
        notifier.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 21);
        assert_eq!(notifier.listener_count(), 1);

        drop(b);
        assert_eq!(notifier.listener_count(), 0);
    }

    #[test]
    fn test_subscription_outlives_notifier() {
        let notifier = ChangeNotifier::new();
        let sub = notifier.subscribe(|| {});
        drop(notifier);
        drop(sub);
    }
}
