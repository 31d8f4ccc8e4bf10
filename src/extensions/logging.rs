//! Middleware that reports store activity through `tracing`.

use async_trait::async_trait;
use std::fmt::Debug;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::middleware::{InitializeContext, Middleware, UpdateContext};
use crate::naming::store_name;
use crate::registry::{Injectable, Resolver, StoreBuilder};

/// Logs initialize and update start and completion at `info`, and blocked
/// operations at `warn`.
///
/// Events are emitted under the `statehouse::store` target with the store
/// name as a field. Register it first to see blocks raised by every other
/// middleware.
pub struct LoggingMiddleware<S> {
    store: &'static str,
    _state: PhantomData<fn() -> S>,
}

impl<S> LoggingMiddleware<S> {
    pub fn new() -> Self {
        Self {
            store: store_name::<S>(),
            _state: PhantomData,
        }
    }
}

impl<S> Default for LoggingMiddleware<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Debug + Send + Sync + 'static> Injectable for LoggingMiddleware<S> {
    fn inject(_resolver: &dyn Resolver) -> Result<Self> {
        Ok(Self::new())
    }
}

#[async_trait]
impl<S: Debug + Send + Sync + 'static> Middleware<S> for LoggingMiddleware<S> {
    async fn before_initialize(
        &self,
        _ctx: &mut InitializeContext<S>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        tracing::info!(target: "statehouse::store", store = self.store, "initializing store");
        Ok(())
    }

    async fn after_initialize(
        &self,
        ctx: &mut InitializeContext<S>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        match ctx.blocked_reason() {
            Some(reason) => {
                tracing::warn!(target: "statehouse::store", store = self.store, reason, "initialization blocked")
            }
            None => tracing::info!(
                target: "statehouse::store",
                store = self.store,
                state = ?ctx.state(),
                "store initialized"
            ),
        }
        Ok(())
    }

    async fn before_update(
        &self,
        ctx: &mut UpdateContext<S>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        tracing::info!(
            target: "statehouse::store",
            store = self.store,
            reason = ctx.reason(),
            state = ?ctx.current_state(),
            "updating store"
        );
        Ok(())
    }

    async fn after_update(
        &self,
        ctx: &mut UpdateContext<S>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        match ctx.blocked_reason() {
            Some(blocked) => tracing::warn!(
                target: "statehouse::store",
                store = self.store,
                reason = ctx.reason(),
                blocked,
                "update blocked"
            ),
            None => tracing::info!(
                target: "statehouse::store",
                store = self.store,
                reason = ctx.reason(),
                from = ?ctx.current_state(),
                to = ?ctx.next_state(),
                "store updated"
            ),
        }
        Ok(())
    }
}

impl<S: Debug + Send + Sync + 'static> StoreBuilder<S> {
    /// Add [`LoggingMiddleware`] to this store.
    pub fn add_logging(&mut self) -> Result<&mut Self> {
        self.add_middleware::<LoggingMiddleware<S>>()
    }
}
