use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::storage::{LocalStorage, LocalStorageExt};
use crate::error::{Result, StoreError};
use crate::middleware::{InitializeContext, Middleware, UpdateContext};
use crate::naming::{short_type_name, store_name};
use crate::registry::{CrossLookup, StoreBuilder};

/// Options for [`PersistenceMiddleware`].
///
/// Bound from the `PersistenceSettings` configuration section like any other
/// store options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Storage key for the state; the state's type name when unset.
    pub storage_key: Option<String>,
}

/// Restores state from [`LocalStorage`] on initialize and writes every
/// committed change back.
///
/// The write happens in the after-update hook, before the store commits. A
/// failure in an inner middleware propagates before this hook runs, so nothing
/// is written. Middleware registered ahead of persistence run their after-hooks
/// later; if one of them fails, storage is left ahead of the snapshot.
/// [`StoreBuilder::add_persistence`] should therefore come before other middleware.
pub struct PersistenceMiddleware<S> {
    storage: Arc<dyn LocalStorage>,
    key: String,
    _state: PhantomData<fn() -> S>,
}

impl<S: Send + Sync + 'static> PersistenceMiddleware<S> {
    pub fn new(storage: Arc<dyn LocalStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            _state: PhantomData,
        }
    }

    /// Build from the storage service and settings registered for the store.
    pub fn from_lookup(lookup: &CrossLookup<'_, S>) -> Result<Self> {
        let storage = lookup
            .service::<dyn LocalStorage>()?
            .ok_or_else(|| StoreError::MissingDependency {
                name: short_type_name::<dyn LocalStorage>().to_string(),
            })?;
        let settings = lookup
            .options::<PersistenceSettings>()?
            .ok_or_else(|| StoreError::MissingDependency {
                name: short_type_name::<PersistenceSettings>().to_string(),
            })?;
        let key = settings
            .storage_key
            .clone()
            .unwrap_or_else(|| store_name::<S>().to_string());
        Ok(Self::new(storage, key))
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl<S> Middleware<S> for PersistenceMiddleware<S>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn before_initialize(
        &self,
        ctx: &mut InitializeContext<S>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        if !self.storage.has_key(&self.key).await? {
            return Ok(());
        }
        let fallback = serde_json::to_value(ctx.state().as_ref())?;
        let restored: S = serde_json::from_value(self.storage.get(&self.key, fallback).await?)?;
        tracing::debug!(key = %self.key, "restored persisted state");
        ctx.set_state(Arc::new(restored));
        Ok(())
    }

    async fn after_update(
        &self,
        ctx: &mut UpdateContext<S>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        if ctx.is_blocked() {
            return Ok(());
        }
        let Some(next) = ctx.next_state() else {
            return Ok(());
        };
        if Arc::ptr_eq(next, ctx.current_state()) {
            return Ok(());
        }
        self.storage.set_item(&self.key, next.as_ref()).await?;
        tracing::trace!(key = %self.key, "persisted state");
        Ok(())
    }
}

impl<S> StoreBuilder<S>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Persist this store's state in `storage`.
    ///
    /// `storage_key` overrides the key from [`PersistenceSettings`]; without
    /// either the state's type name is used.
    pub fn add_persistence(
        &mut self,
        storage: Arc<dyn LocalStorage>,
        storage_key: Option<&str>,
    ) -> Result<&mut Self> {
        let storage_key = storage_key.map(str::to_string);
        self.add_options::<PersistenceSettings>(move |settings| {
            if let Some(key) = &storage_key {
                settings.storage_key = Some(key.clone());
            }
        })?
        .add_service_instance::<dyn LocalStorage>(storage)?
        .add_middleware_with::<PersistenceMiddleware<S>, _, _>(
            |_| {},
            |_, lookup| PersistenceMiddleware::from_lookup(lookup).map(Arc::new),
        )
    }
}
