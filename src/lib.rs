//! # Statehouse
//!
//! Centralized, observable state containers with a middleware pipeline.
//!
//! Statehouse is organized in two layers:
//!
//! ## Store engine
//!
//! The core state primitives:
//! - `Store<S>` - Versioned snapshot of immutable state, changed only through reducers
//! - `Middleware<S>` - Hooks around the initialize and update phases, able to veto
//! - `Subscription` - Handle that stops change notifications when dropped
//!
//! ## Registration
//!
//! Wiring stores into an application:
//! - `StoreBuilder<S>` - Collects middleware, options and services for one store
//! - `Registrar` / `Container` - Bindings stores and their dependencies resolve from
//! - `StoreInitializer` - Initializes every registered store at startup
//!
//! Logging and persistence middleware live in [`extensions`].
//!
//! ```
//! use statehouse::{Registrar, ResolverExt, Store, StoreInitializer};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut registrar = Registrar::new();
//! registrar
//!     .add_store(0u32, |store| {
//!         store.add_logging()?;
//!         Ok(())
//!     })
//!     .unwrap();
//! let container = registrar.build();
//! let cancel = CancellationToken::new();
//!
//! container
//!     .resolve::<StoreInitializer>()
//!     .unwrap()
//!     .initialize_stores(&cancel)
//!     .await
//!     .unwrap();
//!
//! let counter = container.resolve::<Store<u32>>().unwrap();
//! counter
//!     .update(|n: &Arc<u32>| Arc::new(**n + 1), "increment", &cancel)
//!     .await
//!     .unwrap();
//! assert_eq!(*counter.state(), 1);
//! # });
//! ```

pub mod config;
pub mod error;
pub mod extensions;
pub mod initializer;
pub mod middleware;
pub mod naming;
pub mod registry;
pub mod store;

// Re-export main types for convenience
pub use config::{ConfigError, Configuration};
pub use error::{RegistrationKind, Result, StoreError};
pub use initializer::{Initializable, StoreInitializer};
pub use middleware::{InitializeContext, Middleware, UpdateContext};
pub use registry::{
    Container, CrossLookup, Injectable, Lifetime, Registrar, Resolver, ResolverExt, StoreBuilder,
    StoreFactory,
};
pub use store::{StateSnapshot, Store, Subscription, UpdateOutcome};
