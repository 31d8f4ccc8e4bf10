use std::any::TypeId;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::container::{erase, unerase, AnyArc, Resolver};
use crate::error::{Result, StoreError};
use crate::middleware::Middleware;
use crate::naming::options_name;

/// Key of one registration within a store builder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum LookupKey {
    Middleware(TypeId),
    Service(TypeId),
    /// Options are keyed by options type and state type together.
    Options(String),
}

/// A materialized registration.
pub(crate) struct Instance<S: Send + Sync + 'static> {
    value: AnyArc,
    middleware: Option<Arc<dyn Middleware<S>>>,
}

impl<S: Send + Sync + 'static> Instance<S> {
    pub(crate) fn value<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            value: erase(value),
            middleware: None,
        }
    }

    pub(crate) fn middleware<M: Middleware<S>>(middleware: Arc<M>) -> Self {
        Self {
            value: erase(Arc::clone(&middleware)),
            middleware: Some(middleware as Arc<dyn Middleware<S>>),
        }
    }
}

impl<S: Send + Sync + 'static> Clone for Instance<S> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            middleware: self.middleware.clone(),
        }
    }
}

pub(crate) type EntryFactory<S> =
    Arc<dyn Fn(&dyn Resolver, &CrossLookup<'_, S>) -> Result<Instance<S>> + Send + Sync>;

/// Pins the higher-ranked signature on a factory closure.
pub(crate) fn entry_factory<S, F>(factory: F) -> EntryFactory<S>
where
    S: Send + Sync + 'static,
    F: Fn(&dyn Resolver, &CrossLookup<'_, S>) -> Result<Instance<S>> + Send + Sync + 'static,
{
    Arc::new(factory)
}

pub(crate) struct Entry<S: Send + Sync + 'static> {
    pub(crate) type_name: &'static str,
    pub(crate) factory: EntryFactory<S>,
}

/// Lets factories find the other middleware, options and services registered
/// for the same store while it is being built.
///
/// Every registration is materialized lazily, at most once per store
/// construction, so a middleware fetched here is the same instance the
/// pipeline runs. Lookups return `Ok(None)` for anything not registered.
/// The lookup only exists while a store is being built.
pub struct CrossLookup<'r, S: Send + Sync + 'static> {
    resolver: &'r dyn Resolver,
    entries: &'r HashMap<LookupKey, Entry<S>>,
    cache: RefCell<HashMap<LookupKey, Instance<S>>>,
    resolving: RefCell<HashSet<LookupKey>>,
}

impl<'r, S: Send + Sync + 'static> CrossLookup<'r, S> {
    pub(crate) fn new(resolver: &'r dyn Resolver, entries: &'r HashMap<LookupKey, Entry<S>>) -> Self {
        Self {
            resolver,
            entries,
            cache: RefCell::new(HashMap::new()),
            resolving: RefCell::new(HashSet::new()),
        }
    }

    /// The resolver the store is being built against.
    pub fn resolver(&self) -> &'r dyn Resolver {
        self.resolver
    }

    /// The middleware of type `M` registered for this store.
    pub fn middleware<M: Middleware<S>>(&self) -> Result<Option<Arc<M>>> {
        self.typed::<M>(&LookupKey::Middleware(TypeId::of::<M>()))
    }

    /// The service registered under `T` for this store.
    pub fn service<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        self.typed::<T>(&LookupKey::Service(TypeId::of::<T>()))
    }

    /// The options of type `O` configured for this store's state.
    pub fn options<O: Send + Sync + 'static>(&self) -> Result<Option<Arc<O>>> {
        self.typed::<O>(&LookupKey::Options(options_name::<O, S>()))
    }

    pub(crate) fn instantiate_middleware(&self, key: &LookupKey) -> Result<Arc<dyn Middleware<S>>> {
        self.materialize(key)?
            .and_then(|instance| instance.middleware)
            .ok_or_else(|| StoreError::MissingDependency {
                name: format!("{key:?}"),
            })
    }

    fn typed<T: ?Sized + Send + Sync + 'static>(&self, key: &LookupKey) -> Result<Option<Arc<T>>> {
        Ok(self
            .materialize(key)?
            .and_then(|instance| unerase::<T>(&instance.value)))
    }

    fn materialize(&self, key: &LookupKey) -> Result<Option<Instance<S>>> {
        if let Some(found) = self.cache.borrow().get(key) {
            return Ok(Some(found.clone()));
        }
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if !self.resolving.borrow_mut().insert(key.clone()) {
            return Err(StoreError::CircularLookup {
                name: entry.type_name.to_string(),
            });
        }

        let built = (entry.factory)(self.resolver, self);
        self.resolving.borrow_mut().remove(key);
        let instance = built?;

        self.cache.borrow_mut().insert(key.clone(), instance.clone());
        Ok(Some(instance))
    }
}
