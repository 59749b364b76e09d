//! Disposal trait for resource cleanup.

/// Trait for synchronous resource teardown.
///
/// Implement this for instances that need structured cleanup when their
/// owning [`Container`] is disposed or when the [`LifecycleManager`]
/// deactivates (flushing caches, closing file handles, detaching watchers).
/// Disposal hooks run in LIFO order.
///
/// Rust has no duck typing, so "a cached singleton that exposes `dispose()`"
/// is expressed explicitly: a factory enrolls the instance in the container's
/// dispose bag via [`Container::register_disposer`], or the host hands a
/// one-off disposable to [`LifecycleManager::add_disposable`].
///
/// [`Container`]: crate::Container
/// [`Container::register_disposer`]: crate::Container::register_disposer
/// [`LifecycleManager`]: crate::LifecycleManager
/// [`LifecycleManager::add_disposable`]: crate::LifecycleManager::add_disposable
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use orchestron::{Container, Dispose};
///
/// struct IndexCache {
///     name: String,
/// }
///
/// impl Dispose for IndexCache {
///     fn dispose(&self) {
///         println!("flushing cache: {}", self.name);
///     }
/// }
///
/// let container = Container::new();
/// container.register_singleton("index_cache", |c| {
///     let cache = Arc::new(IndexCache { name: "workspace".to_string() });
///     c.register_disposer(cache.clone());
///     Ok(cache)
/// });
/// ```
pub trait Dispose: Send + Sync + 'static {
    /// Perform synchronous cleanup of resources.
    fn dispose(&self);
}
