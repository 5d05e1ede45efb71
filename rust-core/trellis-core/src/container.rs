//! # Service Container
//!
//! Type-keyed registry of construction strategies.
//!
//! A binding maps a type (possibly a `dyn Trait`) to a factory and a
//! [`Lifetime`]. Types without a binding can still be resolved when they
//! implement [`Injectable`], usually through `#[derive(Injectable)]`, which
//! resolves every `Arc<T>` field recursively.
//!
//! Every resolution carries its own stack of in-progress keys so that cycles
//! are reported as [`Error::CircularDependency`] instead of recursing.
//! Singleton slots are guarded by a per-binding lock, which makes concurrent
//! first use construct the instance exactly once.

use crate::error::{Error, Result};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

/// How long a resolved instance lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    /// A fresh instance on every resolution
    #[default]
    Transient,
    /// Constructed once, cached for the container's lifetime
    Singleton,
}

/// A type the container can build without an explicit binding
///
/// Implement by hand or with `#[derive(Injectable)]`.
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Lifetime used when the type is autowired
    const LIFETIME: Lifetime = Lifetime::Transient;

    /// Build the value, pulling dependencies from the resolver
    ///
    /// # Errors
    ///
    /// Propagates any failure to resolve a dependency.
    fn construct(resolver: &mut Resolver<'_>) -> Result<Self>;
}

/// Type-erased realized instance; always wraps an `Arc<T>`
type Instance = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn(&mut Resolver<'_>) -> Result<Instance> + Send + Sync>;

type Slot = Arc<Mutex<Option<Instance>>>;

#[derive(Clone)]
struct Binding {
    factory: Factory,
    lifetime: Lifetime,
    slot: Slot,
}

/// Thread-safe dependency container
///
/// # Example
///
/// ```ignore
/// let container = Container::new();
/// container.singleton::<Database, _>(move |_| Ok(Arc::new(db.clone())));
/// let users = container.resolve::<UserController>()?;
/// ```
#[derive(Default)]
pub struct Container {
    bindings: RwLock<HashMap<TypeId, Binding>>,
    autowired: Mutex<HashMap<TypeId, Slot>>,
}

impl Container {
    /// Create an empty container
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `T` with the given lifetime
    ///
    /// Overwrites any existing binding for the same type, dropping its cached
    /// instance.
    pub fn register<T, F>(&self, factory: F, lifetime: Lifetime)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&mut Resolver<'_>) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let factory: Factory =
            Arc::new(move |resolver: &mut Resolver<'_>| Ok(Arc::new(factory(resolver)?) as Instance));
        let binding = Binding {
            factory,
            lifetime,
            slot: Arc::new(Mutex::new(None)),
        };
        let mut bindings = self
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if bindings.insert(TypeId::of::<T>(), binding).is_some() {
            debug!(key = type_name::<T>(), "Binding replaced");
        }
    }

    /// Register a transient factory
    pub fn bind<T, F>(&self, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&mut Resolver<'_>) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        self.register(factory, Lifetime::Transient);
    }

    /// Register a singleton factory
    pub fn singleton<T, F>(&self, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&mut Resolver<'_>) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        self.register(factory, Lifetime::Singleton);
    }

    /// Register an already built value as a singleton
    pub fn instance<T>(&self, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register(move |_| Ok(value.clone()), Lifetime::Singleton);
    }

    /// Bind `T` to its own autowired constructor with an explicit lifetime
    pub fn bind_type<T: Injectable>(&self, lifetime: Lifetime) {
        self.register(|resolver| T::construct(resolver).map(Arc::new), lifetime);
    }

    /// Check whether an explicit binding exists for `T`
    #[must_use]
    pub fn has<T: ?Sized + 'static>(&self) -> bool {
        self.binding(TypeId::of::<T>()).is_some()
    }

    /// Resolve `T` from its binding, falling back to autowiring
    ///
    /// # Errors
    ///
    /// `CircularDependency` or `UnresolvableDependency` from the dependency
    /// graph, or whatever a factory returns.
    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>> {
        Resolver::new(self).resolve::<T>()
    }

    /// Resolve `T` from an explicit binding only
    ///
    /// # Errors
    ///
    /// `UnknownBinding` when `T` was never registered.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        Resolver::new(self).get::<T>()
    }

    fn binding(&self, id: TypeId) -> Option<Binding> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn autowired_slot(&self, id: TypeId) -> Slot {
        self.autowired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Container")
            .field("bindings", &bindings.len())
            .finish()
    }
}

/// One resolution in progress
///
/// Handed to factories and `Injectable::construct` so nested lookups share
/// the same cycle-detection stack.
pub struct Resolver<'a> {
    container: &'a Container,
    stack: Vec<(TypeId, &'static str)>,
}

impl<'a> Resolver<'a> {
    fn new(container: &'a Container) -> Self {
        Self {
            container,
            stack: Vec::new(),
        }
    }

    /// The container this resolution reads from
    #[must_use]
    pub fn container(&self) -> &'a Container {
        self.container
    }

    /// Resolve `T` from its binding, falling back to autowiring
    ///
    /// # Errors
    ///
    /// See [`Container::resolve`].
    pub fn resolve<T: Injectable>(&mut self) -> Result<Arc<T>> {
        let id = TypeId::of::<T>();
        if let Some(binding) = self.container.binding(id) {
            return self.realize::<T>(&binding);
        }

        self.enter(id, type_name::<T>())?;
        let result = self.autowire::<T>();
        self.stack.pop();
        result
    }

    /// Resolve `T` from an explicit binding only
    ///
    /// # Errors
    ///
    /// See [`Container::get`].
    pub fn get<T: ?Sized + Send + Sync + 'static>(&mut self) -> Result<Arc<T>> {
        let binding = self
            .container
            .binding(TypeId::of::<T>())
            .ok_or(Error::UnknownBinding {
                key: type_name::<T>(),
            })?;
        self.realize::<T>(&binding)
    }

    /// Error for a constructor parameter the container cannot supply
    pub fn unresolvable<T: ?Sized>(
        &self,
        parameter: impl Into<String>,
        reason: impl Into<String>,
    ) -> Error {
        Error::UnresolvableDependency {
            target: type_name::<T>(),
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    fn enter(&mut self, id: TypeId, name: &'static str) -> Result<()> {
        if self.stack.iter().any(|(seen, _)| *seen == id) {
            let mut chain: Vec<&'static str> = self.stack.iter().map(|(_, n)| *n).collect();
            chain.push(name);
            return Err(Error::CircularDependency { chain });
        }
        debug!(key = name, depth = self.stack.len(), "Resolving");
        self.stack.push((id, name));
        Ok(())
    }

    fn realize<T: ?Sized + Send + Sync + 'static>(&mut self, binding: &Binding) -> Result<Arc<T>> {
        self.enter(TypeId::of::<T>(), type_name::<T>())?;
        let instance = match binding.lifetime {
            Lifetime::Transient => (binding.factory)(self),
            Lifetime::Singleton => {
                let mut slot = binding.slot.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(cached) = slot.clone() {
                    Ok(cached)
                } else {
                    (binding.factory)(self).map(|built| {
                        *slot = Some(built.clone());
                        built
                    })
                }
            }
        };
        self.stack.pop();
        downcast::<T>(&instance?)
    }

    fn autowire<T: Injectable>(&mut self) -> Result<Arc<T>> {
        match T::LIFETIME {
            Lifetime::Transient => T::construct(self).map(Arc::new),
            Lifetime::Singleton => {
                let slot = self.container.autowired_slot(TypeId::of::<T>());
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(cached) = slot.as_ref() {
                    return downcast::<T>(cached);
                }
                let built = Arc::new(T::construct(self)?);
                *slot = Some(Arc::new(built.clone()) as Instance);
                Ok(built)
            }
        }
    }
}

fn downcast<T: ?Sized + Send + Sync + 'static>(instance: &Instance) -> Result<Arc<T>> {
    instance
        .downcast_ref::<Arc<T>>()
        .cloned()
        .ok_or(Error::UnknownBinding {
            key: type_name::<T>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Injectable;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Injectable)]
    struct Clock;

    #[derive(Injectable)]
    struct Scheduler {
        clock: Arc<Clock>,
    }

    #[derive(Injectable)]
    #[inject(singleton)]
    struct Registry {
        #[inject(default)]
        names: Vec<String>,
    }

    #[allow(dead_code)]
    #[derive(Injectable)]
    struct Ping {
        pong: Arc<Pong>,
    }

    #[allow(dead_code)]
    #[derive(Injectable)]
    struct Pong {
        ping: Arc<Ping>,
    }

    #[derive(Injectable)]
    struct Port {
        number: u16,
    }

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[derive(Injectable)]
    struct Welcome {
        #[inject(bound)]
        greeter: Arc<dyn Greeter>,
    }

    #[test]
    fn test_autowire_nested_dependency() {
        let container = Container::new();
        let scheduler = container.resolve::<Scheduler>().unwrap();
        let _clock: &Clock = &scheduler.clock;
    }

    #[test]
    fn test_transient_binding_builds_each_time() {
        let container = Container::new();
        container.bind::<Clock, _>(|_| Ok(Arc::new(Clock)));

        let a = container.get::<Clock>().unwrap();
        let b = container.get::<Clock>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_singleton_binding_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let container = Container::new();
        let counter = calls.clone();
        container.singleton::<Clock, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Clock))
        });

        let a = container.resolve::<Clock>().unwrap();
        let b = container.resolve::<Clock>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_autowired_singleton_is_cached() {
        let container = Container::new();
        let a = container.resolve::<Registry>().unwrap();
        let b = container.resolve::<Registry>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.names.is_empty());
    }

    #[test]
    fn test_register_overwrites_existing_binding() {
        let container = Container::new();
        container.instance::<String>(Arc::new("first".to_string()));
        container.instance::<String>(Arc::new("second".to_string()));
        assert_eq!(container.get::<String>().unwrap().as_str(), "second");
    }

    #[test]
    fn test_circular_dependency_is_reported() {
        let container = Container::new();
        match container.resolve::<Ping>() {
            Err(Error::CircularDependency { chain }) => {
                assert_eq!(chain.len(), 3);
                assert_eq!(chain.first(), chain.last());
            }
            other => panic!("expected circular dependency, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_primitive_field_is_unresolvable() {
        let container = Container::new();
        let err = container.resolve::<Port>().err().unwrap();
        match err {
            Error::UnresolvableDependency { parameter, .. } => assert_eq!(parameter, "number"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_explicit_binding_wins_over_autowiring() {
        let container = Container::new();
        container.bind::<Port, _>(|_| Ok(Arc::new(Port { number: 8080 })));
        assert_eq!(container.resolve::<Port>().unwrap().number, 8080);
    }

    #[test]
    fn test_unknown_binding_for_trait_object() {
        let container = Container::new();
        let err = container.get::<dyn Greeter>().err().unwrap();
        assert!(matches!(err, Error::UnknownBinding { .. }));
        assert!(matches!(
            container.resolve::<Welcome>(),
            Err(Error::UnknownBinding { .. })
        ));
    }

    #[test]
    fn test_trait_object_binding() {
        let container = Container::new();
        container.singleton::<dyn Greeter, _>(|_| Ok(Arc::new(English) as Arc<dyn Greeter>));

        let welcome = container.resolve::<Welcome>().unwrap();
        assert_eq!(welcome.greeter.greet(), "hello");
        assert!(container.has::<dyn Greeter>());
    }

    #[test]
    fn test_singleton_constructed_once_under_contention() {
        let calls = Arc::new(AtomicUsize::new(0));
        let container = Arc::new(Container::new());
        let counter = calls.clone();
        container.singleton::<Clock, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(10));
            Ok(Arc::new(Clock))
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let container = container.clone();
                std::thread::spawn(move || container.get::<Clock>().unwrap())
            })
            .collect();
        let resolved: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(resolved.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
