use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

use super::snapshot::StateSnapshot;
use super::subscription::{Subscription, SubscriptionId, Unsubscribe};
use crate::error::{Result, StoreError};
use crate::initializer::Initializable;
use crate::middleware::{InitializeContext, Middleware, Pipeline, Reducer, UpdateContext};

type Listener<S> = Arc<dyn Fn(&Arc<S>) + Send + Sync>;

const INITIAL_REASON: &str = "Initial state";
const INITIALIZED_REASON: &str = "Initialized";

/// What an [`Store::update`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new snapshot was committed and listeners were notified.
    Committed { version: u64 },
    /// The reducer returned the state it was given; nothing changed.
    Unchanged,
    /// A middleware vetoed the update.
    Blocked { reason: String },
}

impl UpdateOutcome {
    /// Whether the update produced a new version.
    pub fn is_committed(&self) -> bool {
        matches!(self, UpdateOutcome::Committed { .. })
    }
}

/// Everything the gate protects.
struct StoreCore<S> {
    current: StateSnapshot<S>,
    subscribers: BTreeMap<SubscriptionId, Listener<S>>,
    initialized: bool,
    disposed: bool,
}

struct StoreInner<S: Send + Sync + 'static> {
    name: &'static str,
    gate: Mutex<StoreCore<S>>,
    next_id: AtomicU64,
    pipeline: Pipeline<S>,
}

/// A versioned, observable state container.
///
/// State changes only through reducers passed to [`Store::update`]. Each
/// update runs through the store's middleware pipeline before it is committed,
/// and subscribers are notified after every committed change.
///
/// Cloning a store yields another handle to the same state.
///
/// # Examples
///
/// ```
/// use statehouse::Store;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let cancel = CancellationToken::new();
/// let store = Store::new(0u32, Vec::new());
/// store.initialize(&cancel).await.unwrap();
///
/// store
///     .update(|n: &Arc<u32>| Arc::new(**n + 1), "inc", &cancel)
///     .await
///     .unwrap();
///
/// assert_eq!(*store.state(), 1);
/// assert_eq!(store.version(), 1);
/// # });
/// ```
pub struct Store<S: Send + Sync + 'static> {
    inner: Arc<StoreInner<S>>,
}

impl<S: Send + Sync + 'static> Store<S> {
    /// Create an uninitialized store with the given middleware, outermost first.
    pub fn new(initial: S, middleware: Vec<Arc<dyn Middleware<S>>>) -> Self {
        Self::from_shared(Arc::new(initial), middleware)
    }

    pub(crate) fn from_shared(initial: Arc<S>, middleware: Vec<Arc<dyn Middleware<S>>>) -> Self {
        let core = StoreCore {
            current: StateSnapshot::new(initial, 0, Some(INITIAL_REASON.to_string())),
            subscribers: BTreeMap::new(),
            initialized: false,
            disposed: false,
        };
        Self {
            inner: Arc::new(StoreInner {
                name: crate::naming::store_name::<S>(),
                gate: Mutex::new(core),
                next_id: AtomicU64::new(0),
                pipeline: Pipeline::new(middleware),
            }),
        }
    }

    /// Name of the state type this store holds.
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Run the initialize pipeline and reset the snapshot to version 0.
    ///
    /// Fails if the store is disposed or was already initialized. A middleware
    /// may replace the state (e.g. with a persisted value) before it is committed.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        let state = {
            let core = self.inner.gate.lock();
            if core.disposed {
                return Err(self.disposed());
            }
            if core.initialized {
                return Err(StoreError::AlreadyInitialized {
                    store: self.inner.name,
                });
            }
            Arc::clone(core.current.state())
        };

        let mut ctx = InitializeContext::new(state);
        self.inner.pipeline.initialize(&mut ctx, cancel).await?;

        if let Some(reason) = ctx.blocked_reason() {
            tracing::debug!(store = self.inner.name, reason, "initialize pipeline blocked");
        }

        let mut core = self.inner.gate.lock();
        if core.disposed {
            return Err(self.disposed());
        }
        core.current = StateSnapshot::new(ctx.into_state(), 0, Some(INITIALIZED_REASON.to_string()));
        core.initialized = true;
        tracing::debug!(store = self.inner.name, "store initialized");
        Ok(())
    }

    /// Run `reducer` through the update pipeline and commit the result.
    ///
    /// The pipeline runs without holding the store's lock. Returning the same
    /// `Arc` from the reducer is treated as "no change": the version stays put
    /// and no listener fires.
    pub async fn update<F>(
        &self,
        reducer: F,
        reason: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome>
    where
        F: Fn(&Arc<S>) -> Arc<S> + Send + Sync + 'static,
    {
        self.run_update(Box::new(reducer), reason.into(), cancel).await
    }

    /// Like [`Store::update`], for reducers that build a new value from a reference.
    ///
    /// Always produces a new state, so every non-blocked call commits.
    pub async fn update_with<F>(
        &self,
        f: F,
        reason: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome>
    where
        F: Fn(&S) -> S + Send + Sync + 'static,
    {
        let reducer: Reducer<S> = Box::new(move |state: &Arc<S>| Arc::new(f(state)));
        self.run_update(reducer, reason.into(), cancel).await
    }

    async fn run_update(
        &self,
        reducer: Reducer<S>,
        reason: String,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome> {
        let current = {
            let core = self.inner.gate.lock();
            self.ensure_ready(&core)?;
            Arc::clone(core.current.state())
        };

        let mut ctx = UpdateContext::new(reducer, current, reason.clone());
        self.inner.pipeline.update(&mut ctx, cancel).await?;

        if let Some(reason) = ctx.blocked_reason() {
            tracing::debug!(store = self.inner.name, reason, "update blocked");
            return Ok(UpdateOutcome::Blocked {
                reason: reason.to_string(),
            });
        }

        let next = ctx.resolve_next_state();
        if Arc::ptr_eq(&next, ctx.current_state()) {
            tracing::trace!(store = self.inner.name, reason = ctx.reason(), "update left state unchanged");
            return Ok(UpdateOutcome::Unchanged);
        }

        let (version, listeners) = {
            let mut core = self.inner.gate.lock();
            if core.disposed {
                return Err(self.disposed());
            }
            let version = core.current.version() + 1;
            core.current = StateSnapshot::new(Arc::clone(&next), version, Some(reason));
            let listeners: Vec<Listener<S>> = core.subscribers.values().cloned().collect();
            (version, listeners)
        };

        tracing::debug!(store = self.inner.name, version, reason = ctx.reason(), "update committed");
        notify(self.inner.name, &listeners, &next);
        Ok(UpdateOutcome::Committed { version })
    }

    /// Register a listener for committed changes.
    ///
    /// With `fire_immediately` the listener also runs once, right away, with
    /// the current state. A panicking listener never affects other listeners
    /// or the caller.
    pub fn subscribe<F>(&self, listener: F, fire_immediately: bool) -> Result<Subscription>
    where
        F: Fn(&Arc<S>) + Send + Sync + 'static,
    {
        let listener: Listener<S> = Arc::new(listener);
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        let state = {
            let mut core = self.inner.gate.lock();
            if core.disposed {
                return Err(self.disposed());
            }
            core.subscribers.insert(id, Arc::clone(&listener));
            Arc::clone(core.current.state())
        };

        if fire_immediately {
            notify(self.inner.name, std::slice::from_ref(&listener), &state);
        }

        let store: Weak<dyn Unsubscribe> = Arc::downgrade(&self.inner) as Weak<dyn Unsubscribe>;
        Ok(Subscription::new(id, store))
    }

    /// Drop every listener and refuse further operations. Safe to call twice.
    pub fn dispose(&self) {
        let mut core = self.inner.gate.lock();
        if core.disposed {
            return;
        }
        core.subscribers.clear();
        core.disposed = true;
        tracing::debug!(store = self.inner.name, "store disposed");
    }

    /// A consistent copy of the current snapshot.
    pub fn snapshot(&self) -> StateSnapshot<S> {
        self.inner.gate.lock().current.clone()
    }

    /// The current state.
    pub fn state(&self) -> Arc<S> {
        Arc::clone(self.inner.gate.lock().current.state())
    }

    /// Version of the current snapshot; 0 until the first committed update.
    pub fn version(&self) -> u64 {
        self.inner.gate.lock().current.version()
    }

    /// Whether [`Store::initialize`] has completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.gate.lock().initialized
    }

    /// Whether [`Store::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.gate.lock().disposed
    }

    /// Number of live listeners.
    pub fn subscriber_count(&self) -> usize {
        self.inner.gate.lock().subscribers.len()
    }

    /// Number of middleware in the pipeline.
    pub fn middleware_count(&self) -> usize {
        self.inner.pipeline.len()
    }

    fn ensure_ready(&self, core: &StoreCore<S>) -> Result<()> {
        if core.disposed {
            return Err(self.disposed());
        }
        if !core.initialized {
            return Err(StoreError::NotInitialized {
                store: self.inner.name,
            });
        }
        Ok(())
    }

    fn disposed(&self) -> StoreError {
        StoreError::Disposed {
            store: self.inner.name,
        }
    }
}

/// Invoke each listener, isolating panics per listener.
fn notify<S>(store: &'static str, listeners: &[Listener<S>], state: &Arc<S>) {
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
            tracing::warn!(store, "store listener panicked; remaining listeners still run");
        }
    }
}

impl<S: Send + Sync + 'static> Unsubscribe for StoreInner<S> {
    fn unsubscribe(&self, id: SubscriptionId) {
        let mut core = self.gate.lock();
        if core.disposed {
            return;
        }
        core.subscribers.remove(&id);
    }
}

impl<S: Send + Sync + 'static> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Send + Sync + 'static> std::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.gate.lock();
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("version", &core.current.version())
            .field("initialized", &core.initialized)
            .field("disposed", &core.disposed)
            .field("subscribers", &core.subscribers.len())
            .finish()
    }
}

#[async_trait]
impl<S: Send + Sync + 'static> Initializable for Store<S> {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        Store::initialize(self, cancel).await
    }

    fn is_initialized(&self) -> bool {
        Store::is_initialized(self)
    }

    fn name(&self) -> &str {
        self.inner.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, PartialEq)]
    struct Counter {
        count: usize,
    }

    fn increment(state: &Arc<Counter>) -> Arc<Counter> {
        Arc::new(Counter {
            count: state.count + 1,
        })
    }

    async fn ready_store() -> Store<Counter> {
        let store = Store::new(Counter { count: 0 }, Vec::new());
        store.initialize(&CancellationToken::new()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn store_update_commits_new_version() {
        let store = ready_store().await;
        let cancel = CancellationToken::new();

        let outcome = store.update(increment, "inc", &cancel).await.unwrap();

        assert_eq!(outcome, UpdateOutcome::Committed { version: 1 });
        let snapshot = store.snapshot();
        assert_eq!(snapshot.state().count, 1);
        assert_eq!(snapshot.version(), 1);
        assert_eq!(snapshot.reason(), Some("inc"));
    }

    #[tokio::test]
    async fn store_initialize_resets_snapshot() {
        let store = Store::new(Counter { count: 5 }, Vec::new());
        assert_eq!(store.snapshot().reason(), Some(INITIAL_REASON));

        store.initialize(&CancellationToken::new()).await.unwrap();

        let snapshot = store.snapshot();
        assert!(store.is_initialized());
        assert_eq!(snapshot.version(), 0);
        assert_eq!(snapshot.reason(), Some(INITIALIZED_REASON));
        assert_eq!(snapshot.state().count, 5);
    }

    #[tokio::test]
    async fn store_rejects_second_initialize() {
        let store = ready_store().await;

        let err = store.initialize(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, StoreError::AlreadyInitialized { store: "Counter" }));
        assert!(store.is_initialized());
    }

    #[tokio::test]
    async fn store_update_requires_initialize() {
        let store = Store::new(Counter { count: 0 }, Vec::new());

        let err = store
            .update(increment, "inc", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NotInitialized { .. }));
    }

    #[tokio::test]
    async fn store_identity_reducer_is_a_no_op() {
        let store = ready_store().await;
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let _sub = store
            .subscribe(
                move |_| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                },
                false,
            )
            .unwrap();
        let before = store.snapshot();

        let outcome = store
            .update(|s: &Arc<Counter>| Arc::clone(s), "noop", &cancel)
            .await
            .unwrap();

        let after = store.snapshot();
        assert_eq!(outcome, UpdateOutcome::Unchanged);
        assert_eq!(after.version(), before.version());
        assert_eq!(after.updated_at(), before.updated_at());
        assert_eq!(after.reason(), before.reason());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_subscribe_fires_immediately_when_asked() {
        let store = ready_store().await;
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let seen_clone = seen.clone();

        let _sub = store
            .subscribe(
                move |state| seen_clone.store(state.count, Ordering::SeqCst),
                true,
            )
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_subscription_drop_unsubscribes() {
        let store = ready_store().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let sub = store
            .subscribe(
                move |_| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                },
                false,
            )
            .unwrap();
        assert_eq!(store.subscriber_count(), 1);
        drop(sub);
        assert_eq!(store.subscriber_count(), 0);

        store
            .update(increment, "inc", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_detached_subscription_stays() {
        let store = ready_store().await;
        store.subscribe(|_| {}, false).unwrap().detach();
        assert_eq!(store.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn store_dispose_is_terminal() {
        let store = ready_store().await;
        let sub = store.subscribe(|_| {}, false).unwrap();

        store.dispose();
        store.dispose();

        assert!(store.is_disposed());
        assert_eq!(store.subscriber_count(), 0);
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(matches!(
            store.update(increment, "inc", &CancellationToken::new()).await,
            Err(StoreError::Disposed { .. })
        ));
        assert!(matches!(
            store.subscribe(|_| {}, false),
            Err(StoreError::Disposed { .. })
        ));
        assert!(matches!(
            store.initialize(&CancellationToken::new()).await,
            Err(StoreError::Disposed { .. })
        ));
    }

    #[tokio::test]
    async fn store_update_with_always_commits() {
        let store = Store::new(7u32, Vec::new());
        let cancel = CancellationToken::new();
        store.initialize(&cancel).await.unwrap();

        let outcome = store.update_with(|n| *n, "same value", &cancel).await.unwrap();

        assert!(outcome.is_committed());
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn store_clone_shares_state() {
        let store = Store::new(Counter { count: 3 }, Vec::new());
        let other = store.clone();
        assert!(Arc::ptr_eq(&store.state(), &other.state()));
        assert_eq!(store.name(), "Counter");
    }
}
