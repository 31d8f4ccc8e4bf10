use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::context::{InitializeContext, UpdateContext};
use super::middleware::Middleware;
use crate::error::{Result, StoreError};

/// One layer of the compiled chain.
enum Stage<S: Send + Sync + 'static> {
    /// Innermost effect: nothing for initialize, the reducer for update.
    Terminal,
    Layer {
        middleware: Arc<dyn Middleware<S>>,
        next: Box<Stage<S>>,
    },
}

/// A middleware list compiled into nested continuations (onion model).
///
/// Built by folding from the last middleware to the first, so the first
/// registered middleware is the outermost layer.
pub struct Pipeline<S: Send + Sync + 'static> {
    root: Stage<S>,
    len: usize,
}

impl<S: Send + Sync + 'static> Pipeline<S> {
    pub fn new(middleware: Vec<Arc<dyn Middleware<S>>>) -> Self {
        let len = middleware.len();
        let root = middleware
            .into_iter()
            .rev()
            .fold(Stage::Terminal, |next, middleware| Stage::Layer {
                middleware,
                next: Box::new(next),
            });
        Self { root, len }
    }

    /// Number of middleware layers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the pipeline has no middleware; updates then only run the reducer.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Run the initialize chain.
    pub async fn initialize(
        &self,
        ctx: &mut InitializeContext<S>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.root.initialize(ctx, cancel).await?;
        // A hook may have been suspended when the token fired.
        check_cancelled(cancel)
    }

    /// Run the update chain.
    pub async fn update(&self, ctx: &mut UpdateContext<S>, cancel: &CancellationToken) -> Result<()> {
        self.root.update(ctx, cancel).await?;
        check_cancelled(cancel)
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    Ok(())
}

impl<S: Send + Sync + 'static> Stage<S> {
    fn initialize<'a>(
        &'a self,
        ctx: &'a mut InitializeContext<S>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            check_cancelled(cancel)?;
            let Stage::Layer { middleware, next } = self else {
                return Ok(());
            };
            let name = middleware.name();

            middleware
                .before_initialize(ctx, cancel)
                .await
                .map_err(|e| StoreError::from_hook(name, e))?;
            if !ctx.is_blocked() {
                next.initialize(ctx, cancel).await?;
            }
            check_cancelled(cancel)?;
            middleware
                .after_initialize(ctx, cancel)
                .await
                .map_err(|e| StoreError::from_hook(name, e))
        })
    }

    fn update<'a>(
        &'a self,
        ctx: &'a mut UpdateContext<S>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            check_cancelled(cancel)?;
            let Stage::Layer { middleware, next } = self else {
                ctx.apply_reducer();
                return Ok(());
            };
            let name = middleware.name();

            middleware
                .before_update(ctx, cancel)
                .await
                .map_err(|e| StoreError::from_hook(name, e))?;
            if !ctx.is_blocked() {
                next.update(ctx, cancel).await?;
            }
            check_cancelled(cancel)?;
            middleware
                .after_update(ctx, cancel)
                .await
                .map_err(|e| StoreError::from_hook(name, e))
        })
    }
}
