use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::context::{InitializeContext, UpdateContext};

/// An interception point around a store's initialize and update phases.
///
/// Every hook is optional. Before-hooks run outermost first; after-hooks run
/// in reverse. A middleware vetoes an operation by calling `block` on the
/// context, which skips every inner middleware and the reducer. After-hooks of
/// the middleware already entered still run on the way out.
///
/// Hook errors abort the operation and leave the store unchanged.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use statehouse::{Middleware, UpdateContext};
/// use tokio_util::sync::CancellationToken;
///
/// struct Limit(u32);
///
/// #[async_trait]
/// impl Middleware<u32> for Limit {
///     async fn before_update(
///         &self,
///         ctx: &mut UpdateContext<u32>,
///         _cancel: &CancellationToken,
///     ) -> anyhow::Result<()> {
///         if **ctx.current_state() >= self.0 {
///             ctx.block("limit reached");
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware<S>: Send + Sync + 'static
where
    S: Send + Sync + 'static,
{
    async fn before_initialize(
        &self,
        _ctx: &mut InitializeContext<S>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_initialize(
        &self,
        _ctx: &mut InitializeContext<S>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_update(
        &self,
        _ctx: &mut UpdateContext<S>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_update(
        &self,
        _ctx: &mut UpdateContext<S>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Name used in error messages.
    fn name(&self) -> &'static str {
        crate::naming::short_type_name::<Self>()
    }
}
