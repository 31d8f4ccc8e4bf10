//! Middleware hooks, their contexts, and the compiled pipeline.
//!
//! Middleware wrap a store's initialize and update phases. Each store owns
//! one instance of every middleware it was built with.

mod context;
#[allow(clippy::module_inception)]
mod middleware;
mod pipeline;

pub use context::{InitializeContext, Reducer, UpdateContext};
pub use middleware::Middleware;
pub use pipeline::Pipeline;
