//! Startup coordination for stores.

#[allow(clippy::module_inception)]
mod initializer;

pub use initializer::{Initializable, StoreInitializer};
