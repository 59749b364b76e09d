//! Container lifetime definitions.

/// Lifetimes controlling how the container caches resolved instances.
///
/// # Lifetime Characteristics
///
/// - **Singleton**: one instance per container, cached on first resolve
/// - **Scoped**: one instance per container fork, independent across forks
/// - **Transient**: fresh instance on every resolve, never cached
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use orchestron::Container;
///
/// struct Config { port: u16 }
/// struct Probe;
///
/// let container = Container::new();
/// container.register_singleton("config", |_| Ok(Arc::new(Config { port: 8080 })));
/// container.register_transient("probe", |_| Ok(Arc::new(Probe)));
///
/// // Singleton: referentially stable across resolves
/// let a = container.resolve::<Config>("config").unwrap();
/// let b = container.resolve::<Config>("config").unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
///
/// // Transient: fresh instance every call
/// let p1 = container.resolve::<Probe>("probe").unwrap();
/// let p2 = container.resolve::<Probe>("probe").unwrap();
/// assert!(!Arc::ptr_eq(&p1, &p2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Single instance per container, constructed lazily and cached forever.
    ///
    /// The factory runs at most once per container instance; every subsequent
    /// resolve of the same name returns the cached instance.
    Singleton,
    /// Single instance per container fork.
    ///
    /// Behaves like a singleton within one container (including a child
    /// created via [`Container::create_child`]), but each fork constructs and
    /// caches its own instance independently.
    ///
    /// [`Container::create_child`]: crate::Container::create_child
    Scoped,
    /// New instance per resolution, never cached.
    Transient,
}
