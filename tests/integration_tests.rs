//! Integration tests for Statehouse

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

use statehouse::extensions::{LocalStorage, LocalStorageExt, MemoryStorage};
use statehouse::{
    InitializeContext, Injectable, Middleware, Registrar, Resolver, ResolverExt, Store,
    StoreBuilder, StoreError, StoreInitializer, UpdateContext, UpdateOutcome,
};

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Counter {
    count: u32,
}

fn increment(state: &Counter) -> Counter {
    Counter {
        count: state.count + 1,
    }
}

/// Blocks updates once the count reaches `max`.
struct Limit {
    max: u32,
}

#[async_trait]
impl Middleware<Counter> for Limit {
    async fn before_update(
        &self,
        ctx: &mut UpdateContext<Counter>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        if ctx.current_state().count >= self.max {
            ctx.block("Limit reached");
        }
        Ok(())
    }
}

type Log = Arc<Mutex<Vec<String>>>;

/// Records every hook it sees as `<tag>:<hook>`.
struct Trace {
    tag: &'static str,
    log: Log,
}

#[async_trait]
impl Middleware<Counter> for Trace {
    async fn before_initialize(
        &self,
        _ctx: &mut InitializeContext<Counter>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}:before_init", self.tag));
        Ok(())
    }

    async fn after_initialize(
        &self,
        _ctx: &mut InitializeContext<Counter>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}:after_init", self.tag));
        Ok(())
    }

    async fn before_update(
        &self,
        _ctx: &mut UpdateContext<Counter>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}:before", self.tag));
        Ok(())
    }

    async fn after_update(
        &self,
        _ctx: &mut UpdateContext<Counter>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}:after", self.tag));
        Ok(())
    }
}

async fn initialized(middleware: Vec<Arc<dyn Middleware<Counter>>>) -> Store<Counter> {
    let store = Store::new(Counter::default(), middleware);
    store.initialize(&CancellationToken::new()).await.unwrap();
    store
}

#[tokio::test]
async fn counter_integration() {
    let store = initialized(Vec::new()).await;
    let cancel = CancellationToken::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let _subscription = store
        .subscribe(move |state| seen_clone.lock().push(state.count), false)
        .unwrap();

    for _ in 0..3 {
        store.update_with(increment, "Increment", &cancel).await.unwrap();
    }

    let snapshot = store.snapshot();
    assert_eq!(snapshot.state().count, 3);
    assert_eq!(snapshot.version(), 3);
    assert_eq!(snapshot.reason(), Some("Increment"));
    assert_eq!(*seen.lock(), vec![1, 2, 3]);
}

#[tokio::test]
async fn blocked_update_leaves_store_untouched() {
    let store = initialized(vec![Arc::new(Limit { max: 1 })]).await;
    let cancel = CancellationToken::new();
    let notified = Arc::new(AtomicUsize::new(0));

    store.update_with(increment, "Increment", &cancel).await.unwrap();
    let counter = notified.clone();
    let _subscription = store
        .subscribe(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            false,
        )
        .unwrap();

    let outcome = store.update_with(increment, "Increment", &cancel).await.unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome::Blocked {
            reason: "Limit reached".into()
        }
    );
    assert_eq!(store.state().count, 1);
    assert_eq!(store.version(), 1);
    assert_eq!(notified.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pipeline_runs_as_an_onion() {
    let log: Log = Arc::default();
    let middleware: Vec<Arc<dyn Middleware<Counter>>> = ["A", "B", "C"]
        .into_iter()
        .map(|tag| {
            Arc::new(Trace {
                tag,
                log: log.clone(),
            }) as Arc<dyn Middleware<Counter>>
        })
        .collect();
    let store = initialized(middleware).await;

    store
        .update_with(increment, "Increment", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "A:before_init",
            "B:before_init",
            "C:before_init",
            "C:after_init",
            "B:after_init",
            "A:after_init",
            "A:before",
            "B:before",
            "C:before",
            "C:after",
            "B:after",
            "A:after",
        ]
    );
}

#[tokio::test]
async fn failing_hook_leaves_snapshot_unchanged() {
    struct Broken;

    #[async_trait]
    impl Middleware<Counter> for Broken {
        async fn after_update(
            &self,
            _ctx: &mut UpdateContext<Counter>,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    let store = initialized(vec![Arc::new(Broken)]).await;

    let err = store
        .update_with(increment, "Increment", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Middleware { middleware: "Broken", .. }));
    assert_eq!(store.state().count, 0);
    assert_eq!(store.version(), 0);
}

#[tokio::test]
async fn cancelled_update_is_not_committed() {
    let store = initialized(vec![Arc::new(Limit { max: 10 })]).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = store.update_with(increment, "Increment", &cancel).await.unwrap_err();

    assert!(matches!(err, StoreError::Cancelled));
    assert_eq!(store.version(), 0);
}

/// Fires the token while suspended in its after-hooks, then reports success.
struct CancelOnExit {
    on_initialize: bool,
}

#[async_trait]
impl Middleware<Counter> for CancelOnExit {
    async fn after_initialize(
        &self,
        _ctx: &mut InitializeContext<Counter>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        if self.on_initialize {
            tokio::task::yield_now().await;
            cancel.cancel();
        }
        Ok(())
    }

    async fn after_update(
        &self,
        _ctx: &mut UpdateContext<Counter>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        cancel.cancel();
        Ok(())
    }
}

#[tokio::test]
async fn cancellation_during_after_hook_discards_update() {
    let store = initialized(vec![Arc::new(CancelOnExit { on_initialize: false })]).await;
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let _subscription = store
        .subscribe(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            false,
        )
        .unwrap();

    let err = store
        .update_with(increment, "Increment", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Cancelled));
    assert_eq!(store.state().count, 0);
    assert_eq!(store.version(), 0);
    assert_eq!(notified.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_during_after_hook_discards_initialize() {
    let store = Store::new(Counter::default(), vec![Arc::new(CancelOnExit { on_initialize: true })]);

    let err = store.initialize(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, StoreError::Cancelled));
    assert!(!store.is_initialized());
    assert_eq!(store.snapshot().reason(), Some("Initial state"));
}

/// Parks every update in its before-hook until the test releases it.
struct Hold {
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
}

#[async_trait]
impl Middleware<Counter> for Hold {
    async fn before_update(
        &self,
        _ctx: &mut UpdateContext<Counter>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.entered.wait().await;
        self.release.wait().await;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_updates_each_commit_once() {
    let entered = Arc::new(Barrier::new(3));
    let release = Arc::new(Barrier::new(3));
    let store = initialized(vec![Arc::new(Hold {
        entered: entered.clone(),
        release: release.clone(),
    })])
    .await;
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let _subscription = store
        .subscribe(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            false,
        )
        .unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update_with(increment, "Increment", &CancellationToken::new())
                    .await
            })
        })
        .collect();

    entered.wait().await;
    // Both updates are suspended inside the hook; reads must not wait on them.
    let during = store.snapshot();
    assert_eq!(during.version(), 0);
    assert_eq!(during.state().count, 0);
    release.wait().await;

    let mut versions = Vec::new();
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            UpdateOutcome::Committed { version } => versions.push(version),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    versions.sort_unstable();

    assert_eq!(versions, vec![1, 2]);
    assert_eq!(store.version(), 2);
    // Both reducers saw count 0; the later commit wins.
    assert_eq!(store.state().count, 1);
    assert_eq!(notified.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn panicking_listener_does_not_stop_others() {
    let store = initialized(Vec::new()).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let _bad = store.subscribe(|_| panic!("listener bug"), false).unwrap();
    let counter = calls.clone();
    let _good = store
        .subscribe(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            false,
        )
        .unwrap();

    let outcome = store
        .update_with(increment, "Increment", &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_committed());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsubscribe_is_idempotent_and_survives_dispose() {
    let store = initialized(Vec::new()).await;
    let first = store.subscribe(|_| {}, false).unwrap();
    let second = store.subscribe(|_| {}, false).unwrap();
    assert_eq!(store.subscriber_count(), 2);

    first.unsubscribe();
    first.unsubscribe();
    assert_eq!(store.subscriber_count(), 1);

    store.dispose();
    second.unsubscribe();
    drop(second);

    assert!(store.is_disposed());
    assert!(matches!(
        store.subscribe(|_| {}, false),
        Err(StoreError::Disposed { .. })
    ));
}

struct Audit;

impl Injectable for Audit {
    fn inject(_resolver: &dyn Resolver) -> statehouse::Result<Self> {
        Ok(Audit)
    }
}

#[async_trait]
impl Middleware<Counter> for Audit {}

#[tokio::test]
async fn registered_stores_initialize_and_persist() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .set_item("Counter", &Counter { count: 5 })
        .await
        .unwrap();

    let mut registrar = Registrar::new();
    let shared: Arc<dyn LocalStorage> = storage.clone();
    registrar
        .add_store(Counter::default(), move |store: &mut StoreBuilder<Counter>| {
            store
                .add_logging()?
                .add_persistence(shared, None)?
                .add_middleware::<Audit>()?;
            Ok(())
        })
        .unwrap();
    let container = registrar.build();
    let cancel = CancellationToken::new();

    let initializer = container.resolve::<StoreInitializer>().unwrap();
    initializer.initialize_stores(&cancel).await.unwrap();
    assert!(initializer.all_initialized());

    let store = container.resolve::<Store<Counter>>().unwrap();
    assert_eq!(store.state().count, 5);
    assert_eq!(store.middleware_count(), 3);

    store.update_with(increment, "Increment", &cancel).await.unwrap();

    let saved: Counter = storage.get_item("Counter", Counter::default()).await.unwrap();
    assert_eq!(saved.count, 6);
}

#[tokio::test]
async fn second_initialize_is_rejected() {
    let store = initialized(Vec::new()).await;

    let err = store.initialize(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, StoreError::AlreadyInitialized { .. }));
}
