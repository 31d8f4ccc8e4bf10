use parking_lot::Mutex;
use std::sync::Weak;

/// Identifier of one listener within one store. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

/// The side of a store a subscription handle talks back to.
pub(crate) trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: SubscriptionId);
}

/// RAII handle for a store listener.
///
/// Dropping the handle or calling [`Subscription::unsubscribe`] removes the
/// listener. Removal happens at most once, and is a no-op once the store is
/// gone or disposed.
#[must_use = "dropping a Subscription removes the listener"]
pub struct Subscription {
    id: SubscriptionId,
    store: Mutex<Option<Weak<dyn Unsubscribe>>>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, store: Weak<dyn Unsubscribe>) -> Self {
        Self {
            id,
            store: Mutex::new(Some(store)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the listener. Later calls do nothing.
    pub fn unsubscribe(&self) {
        let store = self.store.lock().take();
        if let Some(store) = store.and_then(|weak| weak.upgrade()) {
            store.unsubscribe(self.id);
        }
    }

    /// Keep the listener registered for the rest of the store's life.
    pub fn detach(self) {
        self.store.lock().take();
    }

    /// Whether this handle can still remove its listener.
    pub fn is_active(&self) -> bool {
        self.store.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
