use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use super::container::{Injectable, Lifetime, Registrar, Resolver, ResolverExt};
use super::lookup::{entry_factory, CrossLookup, Entry, EntryFactory, Instance, LookupKey};
use crate::config::Configuration;
use crate::error::{RegistrationKind, Result, StoreError};
use crate::initializer::{Initializable, StoreInitializer};
use crate::middleware::Middleware;
use crate::naming::{options_name, short_type_name, store_name};
use crate::store::Store;

type Setup = Box<dyn FnOnce(&mut Registrar) + Send>;

struct Registration<S: Send + Sync + 'static> {
    type_name: &'static str,
    setup: Option<Setup>,
    factory: EntryFactory<S>,
}

/// Collects the middleware, options and services of one store.
///
/// Each registration carries an optional setup step, run once against the
/// [`Registrar`] by [`StoreBuilder::build`], and a factory that produces the
/// instance when a store is created. Registering the same type twice is an
/// error. Middleware run in the order they were added.
///
/// # Examples
///
/// ```
/// use statehouse::{Registrar, StoreBuilder};
/// use std::sync::Arc;
///
/// let mut registrar = Registrar::new();
/// let mut builder = StoreBuilder::new(0u32);
/// builder
///     .add_service_instance::<String>(Arc::new("greeting".to_string()))
///     .unwrap();
///
/// let factory = builder.build(&mut registrar);
/// let container = registrar.build();
/// let store = factory.create(&container).unwrap();
/// assert_eq!(store.middleware_count(), 0);
/// ```
pub struct StoreBuilder<S: Send + Sync + 'static> {
    initial: Arc<S>,
    middleware: IndexMap<LookupKey, Registration<S>>,
    options: IndexMap<LookupKey, Registration<S>>,
    services: IndexMap<LookupKey, Registration<S>>,
}

impl<S: Send + Sync + 'static> StoreBuilder<S> {
    pub fn new(initial: S) -> Self {
        Self {
            initial: Arc::new(initial),
            middleware: IndexMap::new(),
            options: IndexMap::new(),
            services: IndexMap::new(),
        }
    }

    // Middleware

    /// Add middleware `M`, bound in the registrar with a scoped lifetime.
    pub fn add_middleware<M>(&mut self) -> Result<&mut Self>
    where
        M: Middleware<S> + Injectable,
    {
        self.add_middleware_with_lifetime::<M>(Lifetime::Scoped)
    }

    pub fn add_middleware_with_lifetime<M>(&mut self, lifetime: Lifetime) -> Result<&mut Self>
    where
        M: Middleware<S> + Injectable,
    {
        self.add_middleware_with::<M, _, _>(
            move |registrar| {
                registrar.try_add_injectable::<M>(lifetime);
            },
            |resolver, _| resolver.resolve::<M>(),
        )
    }

    /// Add middleware `M` with an explicit setup step and factory.
    ///
    /// The factory may consult the [`CrossLookup`] for other registrations of
    /// this store, but not for `M` itself.
    pub fn add_middleware_with<M, Su, F>(&mut self, setup: Su, factory: F) -> Result<&mut Self>
    where
        M: Middleware<S>,
        Su: FnOnce(&mut Registrar) + Send + 'static,
        F: Fn(&dyn Resolver, &CrossLookup<'_, S>) -> Result<Arc<M>> + Send + Sync + 'static,
    {
        let registration = Registration {
            type_name: short_type_name::<M>(),
            setup: Some(Box::new(setup)),
            factory: entry_factory(move |resolver, lookup| {
                factory(resolver, lookup).map(Instance::middleware)
            }),
        };
        insert(
            &mut self.middleware,
            LookupKey::Middleware(TypeId::of::<M>()),
            RegistrationKind::Middleware,
            registration,
        )?;
        Ok(self)
    }

    // Options

    /// Add options `O`, bound from configuration and then adjusted by `configure`.
    ///
    /// Binding reads the `<Options>` section and then the `<Options>:<State>`
    /// subsection of the registrar's [`Configuration`], so one options type can
    /// be tuned per store. Without a configuration the options start from
    /// `O::default()`.
    pub fn add_options<O>(&mut self, configure: impl Fn(&mut O) + Send + Sync + 'static) -> Result<&mut Self>
    where
        O: Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let name = options_name::<O, S>();
        let binding_name = name.clone();
        let section = short_type_name::<O>();
        let subsection = format!("{section}:{}", store_name::<S>());

        self.add_options_with::<O, _, _>(
            move |registrar| {
                registrar.try_add_named::<O, _>(binding_name, Lifetime::Singleton, move |resolver| {
                    let mut options = match resolver.try_resolve::<Configuration>()? {
                        Some(config) => config.bind::<O>(&[section, subsection.as_str()])?,
                        None => O::default(),
                    };
                    configure(&mut options);
                    Ok(Arc::new(options))
                });
            },
            move |resolver, _| resolver.resolve_named::<O>(&name),
        )
    }

    /// Add options `O` with an explicit setup step and factory.
    pub fn add_options_with<O, Su, F>(&mut self, setup: Su, factory: F) -> Result<&mut Self>
    where
        O: Send + Sync + 'static,
        Su: FnOnce(&mut Registrar) + Send + 'static,
        F: Fn(&dyn Resolver, &CrossLookup<'_, S>) -> Result<Arc<O>> + Send + Sync + 'static,
    {
        let registration = Registration {
            type_name: short_type_name::<O>(),
            setup: Some(Box::new(setup)),
            factory: entry_factory(move |resolver, lookup| factory(resolver, lookup).map(Instance::value)),
        };
        insert(
            &mut self.options,
            LookupKey::Options(options_name::<O, S>()),
            RegistrationKind::Options,
            registration,
        )?;
        Ok(self)
    }

    // Services

    /// Add service `T`, bound in the registrar with a scoped lifetime.
    pub fn add_service<T: Injectable>(&mut self) -> Result<&mut Self> {
        self.add_service_with_lifetime::<T>(Lifetime::Scoped)
    }

    pub fn add_service_with_lifetime<T: Injectable>(&mut self, lifetime: Lifetime) -> Result<&mut Self> {
        self.add_service_with::<T, _, _>(
            move |registrar| {
                registrar.try_add_injectable::<T>(lifetime);
            },
            |resolver, _| resolver.resolve::<T>(),
        )
    }

    /// Add an existing instance as service `T`, private to this store.
    ///
    /// `T` may be a trait object, e.g. `add_service_instance::<dyn Trait>(Arc::new(imp))`.
    pub fn add_service_instance<T>(&mut self, instance: Arc<T>) -> Result<&mut Self>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.add_service_with::<T, _, _>(|_| {}, move |_, _| Ok(Arc::clone(&instance)))
    }

    /// Add service `T` with an explicit setup step and factory.
    pub fn add_service_with<T, Su, F>(&mut self, setup: Su, factory: F) -> Result<&mut Self>
    where
        T: ?Sized + Send + Sync + 'static,
        Su: FnOnce(&mut Registrar) + Send + 'static,
        F: Fn(&dyn Resolver, &CrossLookup<'_, S>) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let registration = Registration {
            type_name: short_type_name::<T>(),
            setup: Some(Box::new(setup)),
            factory: entry_factory(move |resolver, lookup| factory(resolver, lookup).map(Instance::value)),
        };
        insert(
            &mut self.services,
            LookupKey::Service(TypeId::of::<T>()),
            RegistrationKind::Service,
            registration,
        )?;
        Ok(self)
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    // Build

    /// Run every setup step (services, then options, then middleware) and
    /// return the factory that creates stores from a resolver.
    pub fn build(self, registrar: &mut Registrar) -> StoreFactory<S> {
        let StoreBuilder {
            initial,
            middleware,
            options,
            services,
        } = self;

        tracing::debug!(
            store = store_name::<S>(),
            services = services.len(),
            options = options.len(),
            middleware = middleware.len(),
            "building store"
        );

        let mut entries = HashMap::new();
        let mut order = Vec::with_capacity(middleware.len());
        for (group, registrations) in [("services", services), ("options", options), ("middleware", middleware)] {
            for (key, registration) in registrations {
                if let Some(setup) = registration.setup {
                    tracing::trace!(store = store_name::<S>(), group, name = registration.type_name, "running setup");
                    setup(registrar);
                }
                if matches!(key, LookupKey::Middleware(_)) {
                    order.push(key.clone());
                }
                entries.insert(
                    key,
                    Entry {
                        type_name: registration.type_name,
                        factory: registration.factory,
                    },
                );
            }
        }

        StoreFactory {
            plan: Arc::new(BuildPlan {
                initial,
                entries,
                order,
            }),
        }
    }
}

fn insert<S: Send + Sync + 'static>(
    map: &mut IndexMap<LookupKey, Registration<S>>,
    key: LookupKey,
    kind: RegistrationKind,
    registration: Registration<S>,
) -> Result<()> {
    if map.contains_key(&key) {
        return Err(StoreError::DuplicateRegistration {
            kind,
            name: registration.type_name.to_string(),
        });
    }
    map.insert(key, registration);
    Ok(())
}

struct BuildPlan<S: Send + Sync + 'static> {
    initial: Arc<S>,
    entries: HashMap<LookupKey, Entry<S>>,
    order: Vec<LookupKey>,
}

/// Creates fully wired stores from a resolver.
///
/// Produced by [`StoreBuilder::build`]. Each call to [`StoreFactory::create`]
/// instantiates a fresh set of middleware.
pub struct StoreFactory<S: Send + Sync + 'static> {
    plan: Arc<BuildPlan<S>>,
}

impl<S: Send + Sync + 'static> StoreFactory<S> {
    pub fn create(&self, resolver: &dyn Resolver) -> Result<Store<S>> {
        let lookup = CrossLookup::new(resolver, &self.plan.entries);
        let middleware = self
            .plan
            .order
            .iter()
            .map(|key| lookup.instantiate_middleware(key))
            .collect::<Result<Vec<_>>>()?;
        Ok(Store::from_shared(Arc::clone(&self.plan.initial), middleware))
    }
}

impl<S: Send + Sync + 'static> Clone for StoreFactory<S> {
    fn clone(&self) -> Self {
        Self {
            plan: Arc::clone(&self.plan),
        }
    }
}

impl Registrar {
    /// Register a store for state `S`, its initializable handle, and the
    /// [`StoreInitializer`].
    ///
    /// The store is scoped: every container scope gets its own instance.
    ///
    /// # Examples
    ///
    /// ```
    /// use statehouse::{Registrar, ResolverExt, Store, StoreInitializer};
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let mut registrar = Registrar::new();
    /// registrar.add_store(0u32, |_| Ok(())).unwrap();
    /// let container = registrar.build();
    ///
    /// let initializer = container.resolve::<StoreInitializer>().unwrap();
    /// initializer.initialize_stores(&CancellationToken::new()).await.unwrap();
    ///
    /// assert!(container.resolve::<Store<u32>>().unwrap().is_initialized());
    /// # });
    /// ```
    pub fn add_store<S, F>(&mut self, initial: S, configure: F) -> Result<()>
    where
        S: Send + Sync + 'static,
        F: FnOnce(&mut StoreBuilder<S>) -> Result<()>,
    {
        if self.contains::<Store<S>>() {
            return Err(StoreError::DuplicateRegistration {
                kind: RegistrationKind::Store,
                name: store_name::<S>().to_string(),
            });
        }

        let mut builder = StoreBuilder::new(initial);
        configure(&mut builder)?;
        let factory = builder.build(self);

        self.try_add::<Store<S>, _>(Lifetime::Scoped, move |resolver| factory.create(resolver).map(Arc::new));
        self.add_many::<dyn Initializable, _>(Lifetime::Scoped, |resolver| {
            let store = resolver.resolve::<Store<S>>()?;
            Ok(store as Arc<dyn Initializable>)
        });
        self.try_add_injectable::<StoreInitializer>(Lifetime::Scoped);
        Ok(())
    }
}
