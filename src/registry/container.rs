use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, StoreError};

/// A type-erased instance: an `Arc<dyn Any>` wrapping an `Arc<T>`.
///
/// The extra indirection lets `T` be unsized (`dyn Trait` services).
pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;

type BindingFactory = Arc<dyn Fn(&dyn Resolver) -> Result<AnyArc> + Send + Sync>;

pub(crate) fn erase<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> AnyArc {
    Arc::new(value)
}

pub(crate) fn unerase<T: ?Sized + Send + Sync + 'static>(value: &AnyArc) -> Option<Arc<T>> {
    value.downcast_ref::<Arc<T>>().cloned()
}

/// How long a resolved instance is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// One instance for the container and all its scopes.
    Singleton,
    /// One instance per scope.
    Scoped,
    /// A new instance on every resolution.
    Transient,
}

/// Identifies a binding: a type, optionally qualified by a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    type_id: TypeId,
    type_name: &'static str,
    name: Option<String>,
}

impl BindingKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            name: None,
        }
    }

    pub fn named<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::of::<T>()
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({name})", self.type_name),
            None => self.type_name.to_string(),
        }
    }
}

#[derive(Clone)]
struct Binding {
    lifetime: Lifetime,
    factory: BindingFactory,
}

/// Resolves instances from declared bindings.
///
/// Object safe so factories can take `&dyn Resolver`; the typed helpers live
/// on [`ResolverExt`].
pub trait Resolver: Send + Sync {
    /// Resolve a single binding, or `None` if nothing is bound under `key`.
    fn resolve_key(&self, key: &BindingKey) -> Result<Option<AnyArc>>;

    /// Resolve every entry of a collection binding, in registration order.
    fn resolve_collection(&self, key: &BindingKey) -> Result<Vec<AnyArc>>;
}

/// Typed resolution on top of [`Resolver`].
pub trait ResolverExt: Resolver {
    /// Resolve `T`, failing if it is not bound.
    fn resolve<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.try_resolve::<T>()?.ok_or_else(|| StoreError::MissingDependency {
            name: std::any::type_name::<T>().to_string(),
        })
    }

    /// Resolve `T` if it is bound.
    fn try_resolve<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        let key = BindingKey::of::<T>();
        Ok(self.resolve_key(&key)?.and_then(|any| unerase::<T>(&any)))
    }

    /// Resolve the binding of `T` registered under `name`.
    fn resolve_named<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let key = BindingKey::named::<T>(name);
        self.resolve_key(&key)?
            .and_then(|any| unerase::<T>(&any))
            .ok_or_else(|| StoreError::MissingDependency {
                name: key.describe(),
            })
    }

    /// Resolve every `T` added with [`Registrar::add_many`].
    fn resolve_all<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        let key = BindingKey::of::<T>();
        Ok(self
            .resolve_collection(&key)?
            .iter()
            .filter_map(unerase::<T>)
            .collect())
    }
}

impl<R: Resolver + ?Sized> ResolverExt for R {}

/// Types a [`Registrar`] can construct on its own.
pub trait Injectable: Sized + Send + Sync + 'static {
    fn inject(resolver: &dyn Resolver) -> Result<Self>;
}

/// Configuration-time table of bindings.
///
/// Store builders run their setup steps against a registrar; [`Registrar::build`]
/// freezes it into a [`Container`].
#[derive(Default)]
pub struct Registrar {
    bindings: HashMap<BindingKey, Binding>,
    collections: HashMap<BindingKey, Vec<Binding>>,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `T` unless it is already bound. Returns whether the binding was added.
    pub fn try_add<T, F>(&mut self, lifetime: Lifetime, factory: F) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&dyn Resolver) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        self.try_add_key(BindingKey::of::<T>(), lifetime, factory)
    }

    /// Bind `T` under `name` unless that name is already bound.
    pub fn try_add_named<T, F>(&mut self, name: impl Into<String>, lifetime: Lifetime, factory: F) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&dyn Resolver) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        self.try_add_key(BindingKey::named::<T>(name), lifetime, factory)
    }

    /// Bind an [`Injectable`] type to itself.
    pub fn try_add_injectable<T: Injectable>(&mut self, lifetime: Lifetime) -> bool {
        self.try_add::<T, _>(lifetime, |resolver| T::inject(resolver).map(Arc::new))
    }

    /// Bind an existing instance as a singleton.
    pub fn add_instance<T: ?Sized + Send + Sync + 'static>(&mut self, instance: Arc<T>) -> bool {
        self.try_add::<T, _>(Lifetime::Singleton, move |_| Ok(Arc::clone(&instance)))
    }

    /// Append a binding to the collection of `T`.
    pub fn add_many<T, F>(&mut self, lifetime: Lifetime, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&dyn Resolver) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        self.collections
            .entry(BindingKey::of::<T>())
            .or_default()
            .push(Binding {
                lifetime,
                factory: erase_factory(factory),
            });
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.bindings.contains_key(&BindingKey::of::<T>())
    }

    pub fn contains_named<T: ?Sized + 'static>(&self, name: &str) -> bool {
        self.bindings.contains_key(&BindingKey::named::<T>(name))
    }

    pub fn len(&self) -> usize {
        self.bindings.len() + self.collections.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn build(self) -> Container {
        let root_scope: ScopeCache = Arc::default();
        Container {
            root: Arc::new(Root {
                bindings: self.bindings,
                collections: self.collections,
                singletons: Mutex::new(HashMap::new()),
                root_scope: Arc::clone(&root_scope),
            }),
            scoped: root_scope,
        }
    }

    fn try_add_key<T, F>(&mut self, key: BindingKey, lifetime: Lifetime, factory: F) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&dyn Resolver) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        if self.bindings.contains_key(&key) {
            return false;
        }
        self.bindings.insert(
            key,
            Binding {
                lifetime,
                factory: erase_factory(factory),
            },
        );
        true
    }
}

fn erase_factory<T, F>(factory: F) -> BindingFactory
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&dyn Resolver) -> Result<Arc<T>> + Send + Sync + 'static,
{
    fn pin<G>(g: G) -> BindingFactory
    where
        G: Fn(&dyn Resolver) -> Result<AnyArc> + Send + Sync + 'static,
    {
        Arc::new(g)
    }
    pin(move |resolver| factory(resolver).map(erase))
}

/// Cache slot for singletons and scoped instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Slot {
    Single(BindingKey),
    Collection(BindingKey, usize),
}

type ScopeCache = Arc<Mutex<HashMap<Slot, AnyArc>>>;

struct Root {
    bindings: HashMap<BindingKey, Binding>,
    collections: HashMap<BindingKey, Vec<Binding>>,
    singletons: Mutex<HashMap<Slot, AnyArc>>,
    /// Scoped instances of the root scope, which singleton factories resolve against.
    root_scope: ScopeCache,
}

/// A resolution scope over a frozen set of bindings.
///
/// The container returned by [`Registrar::build`] is the root scope;
/// [`Container::create_scope`] opens sibling scopes that share singletons but
/// own their scoped instances. Singletons are always built against the root
/// scope, so a singleton never captures a child scope's instances.
pub struct Container {
    root: Arc<Root>,
    scoped: ScopeCache,
}

impl Container {
    pub fn create_scope(&self) -> Container {
        Container {
            root: Arc::clone(&self.root),
            scoped: Arc::default(),
        }
    }

    fn root_scope(&self) -> Container {
        Container {
            root: Arc::clone(&self.root),
            scoped: Arc::clone(&self.root.root_scope),
        }
    }

    fn instantiate(&self, slot: Slot, binding: &Binding) -> Result<AnyArc> {
        let cache = match binding.lifetime {
            Lifetime::Transient => return (binding.factory)(self),
            Lifetime::Singleton => &self.root.singletons,
            Lifetime::Scoped => &self.scoped,
        };
        if let Some(existing) = cache.lock().get(&slot) {
            return Ok(Arc::clone(existing));
        }
        // Built without the lock held: factories resolve their own dependencies.
        let created = match binding.lifetime {
            Lifetime::Singleton => (binding.factory)(&self.root_scope())?,
            _ => (binding.factory)(self)?,
        };
        let mut cache = cache.lock();
        Ok(Arc::clone(cache.entry(slot).or_insert(created)))
    }
}

impl Resolver for Container {
    fn resolve_key(&self, key: &BindingKey) -> Result<Option<AnyArc>> {
        match self.root.bindings.get(key) {
            Some(binding) => self.instantiate(Slot::Single(key.clone()), binding).map(Some),
            None => Ok(None),
        }
    }

    fn resolve_collection(&self, key: &BindingKey) -> Result<Vec<AnyArc>> {
        let Some(bindings) = self.root.collections.get(key) else {
            return Ok(Vec::new());
        };
        bindings
            .iter()
            .enumerate()
            .map(|(idx, binding)| self.instantiate(Slot::Collection(key.clone(), idx), binding))
            .collect()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("bindings", &self.root.bindings.len())
            .field("collections", &self.root.collections.len())
            .finish()
    }
}
