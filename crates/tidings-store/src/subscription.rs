//! Change listeners and the per-kind write fences.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tidings_shared::MessageKey;

use crate::changes::ChangeSet;

type Callback<K> = Arc<dyn Fn(&ChangeSet<K>) + Send + Sync>;

struct Listener<K> {
    active: Arc<AtomicBool>,
    callback: Callback<K>,
}

/// Handle returned by [`crate::LocalStore::subscribe`].
///
/// Dropping the handle unsubscribes.  Once [`SubscriptionHandle::unsubscribe`]
/// returns, the listener is never invoked again; a callback already running
/// on another thread is allowed to finish.
#[must_use = "dropping the handle unsubscribes the listener"]
#[derive(Debug)]
pub struct SubscriptionHandle {
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Stop further callbacks.  Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Writer fence and listener list of one entity kind.
pub struct KindSlot<K> {
    writer: Mutex<()>,
    listeners: Mutex<Vec<Listener<K>>>,
}

impl<K> KindSlot<K> {
    fn new() -> Self {
        Self {
            writer: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Serializes writes of this kind together with their notification
    /// delivery, so listeners see commits in order.
    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(
        &self,
        callback: impl Fn(&ChangeSet<K>) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let active = Arc::new(AtomicBool::new(true));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener {
                active: active.clone(),
                callback: Arc::new(callback),
            });
        SubscriptionHandle { active }
    }

    /// Invoke every live listener once.  The list lock is released before
    /// any callback runs, so callbacks may subscribe or query freely.
    pub(crate) fn deliver(&self, changes: &ChangeSet<K>) {
        let live: Vec<(Arc<AtomicBool>, Callback<K>)> = {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|l| l.active.load(Ordering::SeqCst));
            listeners
                .iter()
                .map(|l| (l.active.clone(), l.callback.clone()))
                .collect()
        };

        for (active, callback) in live {
            if active.load(Ordering::SeqCst) {
                callback(changes);
            }
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners
            .iter()
            .filter(|l| l.active.load(Ordering::SeqCst))
            .count()
    }
}

/// One [`KindSlot`] per entity kind.
pub struct KindSlots {
    pub(crate) channels: KindSlot<String>,
    pub(crate) messages: KindSlot<MessageKey>,
}

impl KindSlots {
    pub(crate) fn new() -> Self {
        Self {
            channels: KindSlot::new(),
            messages: KindSlot::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tidings_shared::EntityKind;

    #[test]
    fn test_unsubscribe_is_idempotent_and_fences() {
        let slot = KindSlot::<String>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = slot.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let changes = ChangeSet::empty(EntityKind::Channels);
        slot.deliver(&changes);
        handle.unsubscribe();
        handle.unsubscribe();
        slot.deliver(&changes);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(slot.listener_count(), 0);
    }

    #[test]
    fn test_dropping_the_handle_unsubscribes() {
        let slot = KindSlot::<String>::new();
        let handle = slot.subscribe(|_| {});
        assert_eq!(slot.listener_count(), 1);
        drop(handle);
        assert_eq!(slot.listener_count(), 0);
    }
}
