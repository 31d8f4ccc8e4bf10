//! Counter application wiring a store with logging, persistence and a limit

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use statehouse::extensions::{FileStorage, LocalStorage};
use statehouse::{
    Configuration, Middleware, Registrar, ResolverExt, Store, StoreInitializer, UpdateContext,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CounterState {
    count: i64,
    history: Vec<i64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct CounterLimits {
    max: i64,
}

/// Refuses to count past the configured maximum.
struct MaxCount {
    max: i64,
}

#[async_trait]
impl Middleware<CounterState> for MaxCount {
    async fn before_update(
        &self,
        ctx: &mut UpdateContext<CounterState>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let next = ctx.reduce(ctx.current_state());
        if next.count > self.max {
            ctx.block(format!("count may not exceed {}", self.max));
        } else {
            ctx.set_next_state(next);
        }
        Ok(())
    }
}

fn step(delta: i64) -> impl Fn(&CounterState) -> CounterState + Send + Sync + 'static {
    move |state| {
        let mut next = state.clone();
        next.count += delta;
        next.history.push(next.count);
        next
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("statehouse=info")),
        )
        .init();

    println!("=== Counter Application ===\n");

    let config = Configuration::from_toml_str(
        r#"
        [CounterLimits]
        max = 5

        [PersistenceSettings]
        storage_key = "counter"
        "#,
    )?;

    let dir = std::env::temp_dir().join("statehouse-counter-app");
    let storage: Arc<dyn LocalStorage> = Arc::new(FileStorage::new(&dir));
    println!("Persisting state under {}\n", dir.display());

    let mut registrar = Registrar::new();
    registrar.add_instance(Arc::new(config));
    registrar.add_store(CounterState::default(), move |store| {
        store
            .add_logging()?
            .add_persistence(storage, None)?
            .add_options::<CounterLimits>(|_| {})?
            .add_middleware_with::<MaxCount, _, _>(
                |_| {},
                |_, lookup| {
                    let limits = lookup.options::<CounterLimits>()?.unwrap_or_default();
                    Ok(Arc::new(MaxCount { max: limits.max }))
                },
            )?;
        Ok(())
    })?;
    let container = registrar.build();
    let cancel = CancellationToken::new();

    container
        .resolve::<StoreInitializer>()?
        .initialize_stores(&cancel)
        .await?;

    let counter = container.resolve::<Store<CounterState>>()?;
    println!("Restored count: {}", counter.state().count);

    let _subscription = counter.subscribe(
        |state| println!("   -> count is now {} (history {:?})", state.count, state.history),
        false,
    )?;

    for delta in [1, 1, 2, -1, 3] {
        println!("Applying {delta:+}...");
        let outcome = counter.update_with(step(delta), format!("step {delta:+}"), &cancel).await?;
        println!("   {outcome:?}");
    }

    let snapshot = counter.snapshot();
    println!(
        "\nFinal count {} at version {} ({})",
        snapshot.state().count,
        snapshot.version(),
        snapshot.reason().unwrap_or("no reason")
    );

    println!("\n✓ Example complete!");
    Ok(())
}
