use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::{Injectable, Resolver, ResolverExt};

/// A store as seen by the startup coordinator.
#[async_trait]
pub trait Initializable: Send + Sync {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()>;

    fn is_initialized(&self) -> bool;

    fn name(&self) -> &str;
}

/// Initializes every registered store once at application startup.
///
/// Stores are visited in registration order; stores that are already
/// initialized are skipped.
pub struct StoreInitializer {
    stores: Vec<Arc<dyn Initializable>>,
}

impl StoreInitializer {
    pub fn new(stores: Vec<Arc<dyn Initializable>>) -> Self {
        Self { stores }
    }

    /// Initialize every store that is not initialized yet.
    ///
    /// Stops at the first failure and returns it.
    pub async fn initialize_stores(&self, cancel: &CancellationToken) -> Result<()> {
        for store in &self.stores {
            if store.is_initialized() {
                continue;
            }
            tracing::debug!(store = store.name(), "initializing store");
            store.initialize(cancel).await?;
        }
        Ok(())
    }

    /// Number of stores this initializer drives.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no store is registered.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Whether every store has been initialized.
    pub fn all_initialized(&self) -> bool {
        self.stores.iter().all(|store| store.is_initialized())
    }
}

impl Injectable for StoreInitializer {
    fn inject(resolver: &dyn Resolver) -> Result<Self> {
        Ok(Self::new(resolver.resolve_all::<dyn Initializable>()?))
    }
}
