//! String-keyed dependency-injection container.
//!
//! Maps a name to a factory plus a [`Lifetime`] policy, resolves lazily,
//! memoizes singletons and scoped instances, and disposes enrolled instances
//! on teardown. The container is the composition root's owned value; there
//! are no ambient globals, and "reset" means constructing a new container.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{KernelError, KernelResult};
use crate::lifetime::Lifetime;
use crate::traits::Dispose;

/// Type-erased instance handle stored by the container.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn(&Container) -> KernelResult<AnyArc> + Send + Sync>;

#[derive(Clone)]
struct Descriptor {
    lifetime: Lifetime,
    factory: Factory,
}

struct ContainerInner {
    registrations: RwLock<HashMap<String, Descriptor>>,
    singletons: Mutex<HashMap<String, AnyArc>>,
    scoped: Mutex<HashMap<String, AnyArc>>,
    dispose_bag: Mutex<Vec<Arc<dyn Dispose>>>,
    resolving: Mutex<Vec<String>>,
    disposed: AtomicBool,
}

// Pops the in-flight resolution path on both the success and error path.
struct PathGuard {
    inner: Arc<ContainerInner>,
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        self.inner.resolving.lock().unwrap().pop();
    }
}

/// Dependency-injection registry with singleton, scoped, and transient
/// lifetimes.
///
/// Construction is lazy: a factory runs on first resolve, not at
/// registration. Singleton resolves are referentially stable for the life of
/// the container; transient resolves construct a fresh instance every call;
/// scoped resolves are memoized per container fork (see
/// [`create_child`](Self::create_child)).
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use orchestron::{Container, EventBus};
///
/// struct Indexer {
///     bus: EventBus,
/// }
///
/// let container = Container::new();
/// container.register_instance("event_bus", Arc::new(EventBus::new()));
/// container.register_singleton("indexer", |c| {
///     let bus = c.resolve::<EventBus>("event_bus")?;
///     Ok(Arc::new(Indexer { bus: (*bus).clone() }))
/// });
///
/// let a = container.resolve::<Indexer>("indexer").unwrap();
/// let b = container.resolve::<Indexer>("indexer").unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                registrations: RwLock::new(HashMap::new()),
                singletons: Mutex::new(HashMap::new()),
                scoped: Mutex::new(HashMap::new()),
                dispose_bag: Mutex::new(Vec::new()),
                resolving: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a singleton: the factory runs at most once per container;
    /// the instance is cached and returned on every subsequent resolve.
    pub fn register_singleton<T, F>(&self, name: impl Into<String>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> KernelResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register_erased(name.into(), Lifetime::Singleton, erase(factory));
    }

    /// Registers a transient: a fresh instance is constructed on every
    /// resolve.
    pub fn register_transient<T, F>(&self, name: impl Into<String>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> KernelResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register_erased(name.into(), Lifetime::Transient, erase(factory));
    }

    /// Registers a scoped instance: memoized like a singleton within one
    /// container fork, independent across forks.
    pub fn register_scoped<T, F>(&self, name: impl Into<String>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> KernelResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register_erased(name.into(), Lifetime::Scoped, erase(factory));
    }

    /// Registers an already-constructed instance as a resolved singleton.
    pub fn register_instance<T>(&self, name: impl Into<String>, instance: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let name = name.into();
        let cached: AnyArc = instance;
        self.inner
            .singletons
            .lock()
            .unwrap()
            .insert(name.clone(), cached.clone());
        self.register_erased(
            name,
            Lifetime::Singleton,
            Arc::new(move |_| Ok(cached.clone())),
        );
    }

    /// Registers an already-constructed instance and enrolls it for LIFO
    /// disposal when this container is disposed.
    pub fn register_instance_with_disposer<T>(&self, name: impl Into<String>, instance: Arc<T>)
    where
        T: Any + Dispose,
    {
        self.register_disposer(instance.clone());
        self.register_instance(name, instance);
    }

    /// Enrolls an instance for LIFO disposal when this container is
    /// disposed. Typically called from inside a factory.
    pub fn register_disposer(&self, disposable: Arc<dyn Dispose>) {
        self.inner.dispose_bag.lock().unwrap().push(disposable);
    }

    /// Resolves `name` and downcasts to `T`.
    ///
    /// Fails with [`KernelError::ServiceNotFound`] for an unregistered name
    /// and [`KernelError::TypeMismatch`] when the registered instance is not
    /// a `T`.
    pub fn resolve<T>(&self, name: &str) -> KernelResult<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let erased = self.resolve_erased(name)?;
        erased
            .downcast::<T>()
            .map_err(|_| KernelError::TypeMismatch(name.to_string()))
    }

    /// Resolves several names at once, preserving order.
    pub fn resolve_many(&self, names: &[&str]) -> KernelResult<Vec<AnyArc>> {
        names.iter().map(|name| self.resolve_erased(name)).collect()
    }

    /// Resolves `name` without downcasting.
    pub fn resolve_erased(&self, name: &str) -> KernelResult<AnyArc> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(KernelError::Disposed);
        }

        let _guard = self.enter_resolution(name)?;

        let descriptor = {
            let registrations = self.inner.registrations.read().unwrap();
            registrations
                .get(name)
                .cloned()
                .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))?
        };

        match descriptor.lifetime {
            Lifetime::Singleton => self.resolve_cached(&self.inner.singletons, name, &descriptor),
            Lifetime::Scoped => self.resolve_cached(&self.inner.scoped, name, &descriptor),
            Lifetime::Transient => (descriptor.factory)(self),
        }
    }

    /// Whether `name` is registered.
    pub fn has(&self, name: &str) -> bool {
        self.inner
            .registrations
            .read()
            .unwrap()
            .contains_key(name)
    }

    /// Names of all current registrations, unordered.
    pub fn registered_names(&self) -> Vec<String> {
        self.inner
            .registrations
            .read()
            .unwrap()
            .keys()
            .cloned()
            .collect()
    }

    /// Creates a child container that copies this container's registrations
    /// and shares nothing else: caches and the dispose bag start empty, so
    /// scoped (and singleton) instances are constructed independently in the
    /// child.
    pub fn create_child(&self) -> Container {
        let child = Container::new();
        let registrations = self.inner.registrations.read().unwrap().clone();
        *child.inner.registrations.write().unwrap() = registrations;
        child
    }

    /// Disposes the container: runs the dispose bag in LIFO order, then
    /// clears all caches and registrations, resetting the container to
    /// empty. The container stays usable; new registrations and resolves
    /// work as on a fresh instance. Idempotent: a second call is a no-op.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("disposing container");

        let bag: Vec<Arc<dyn Dispose>> = {
            let mut bag = self.inner.dispose_bag.lock().unwrap();
            bag.drain(..).collect()
        };
        for disposable in bag.into_iter().rev() {
            disposable.dispose();
        }

        self.inner.singletons.lock().unwrap().clear();
        self.inner.scoped.lock().unwrap().clear();
        self.inner.registrations.write().unwrap().clear();
        self.inner.disposed.store(false, Ordering::SeqCst);
    }

    fn register_erased(&self, name: String, lifetime: Lifetime, factory: Factory) {
        self.inner
            .registrations
            .write()
            .unwrap()
            .insert(name, Descriptor { lifetime, factory });
    }

    fn resolve_cached(
        &self,
        cache: &Mutex<HashMap<String, AnyArc>>,
        name: &str,
        descriptor: &Descriptor,
    ) -> KernelResult<AnyArc> {
        if let Some(cached) = cache.lock().unwrap().get(name) {
            return Ok(cached.clone());
        }
        // The cache lock is not held while the factory runs, so factories
        // may resolve their own dependencies re-entrantly.
        let instance = (descriptor.factory)(self)?;
        let mut cache = cache.lock().unwrap();
        Ok(cache
            .entry(name.to_string())
            .or_insert(instance)
            .clone())
    }

    // Detects factory cycles: a name already on the in-flight resolution
    // path means a factory is resolving itself, directly or indirectly.
    fn enter_resolution(&self, name: &str) -> KernelResult<PathGuard> {
        let mut resolving = self.inner.resolving.lock().unwrap();
        if resolving.iter().any(|n| n == name) {
            let mut path = resolving.clone();
            path.push(name.to_string());
            return Err(KernelError::CircularDependency(path));
        }
        resolving.push(name.to_string());
        Ok(PathGuard {
            inner: self.inner.clone(),
        })
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

fn erase<T, F>(factory: F) -> Factory
where
    T: Any + Send + Sync,
    F: Fn(&Container) -> KernelResult<Arc<T>> + Send + Sync + 'static,
{
    Arc::new(move |container| factory(container).map(|instance| instance as AnyArc))
}
