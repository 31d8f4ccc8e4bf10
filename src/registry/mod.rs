//! Store registration: builders, the cross-registration lookup, and the
//! binding container stores are resolved from.

mod builder;
mod container;
mod lookup;

pub use builder::{StoreBuilder, StoreFactory};
pub use container::{BindingKey, Container, Injectable, Lifetime, Registrar, Resolver, ResolverExt};
pub use lookup::CrossLookup;
