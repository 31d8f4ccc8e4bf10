//! The store engine.
//!
//! A store owns one immutable snapshot of its state, the set of listeners,
//! and the compiled middleware pipeline.

mod snapshot;
#[allow(clippy::module_inception)]
mod store;
mod subscription;

pub use snapshot::StateSnapshot;
pub use store::{Store, UpdateOutcome};
pub use subscription::{Subscription, SubscriptionId};
