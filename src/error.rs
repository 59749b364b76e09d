//! Error types for the orchestration kernel.

use std::time::Duration;

/// Orchestration kernel errors.
///
/// Covers the full taxonomy of failures that can occur across the container,
/// event bus, service registry, lifecycle manager, and health monitor.
///
/// Errors from a single service's lifecycle operation are local to that
/// service (and to dependents that can no longer satisfy their dependency
/// check). Errors from a lifecycle phase abort the remainder of activation.
/// Errors from a health probe are never surfaced as errors at all; they are
/// downgraded to an unhealthy status by the registry's health check.
///
/// # Examples
///
/// ```rust
/// use orchestron::KernelError;
///
/// let not_found = KernelError::ServiceNotFound("telemetry".into());
/// let circular = KernelError::CircularDependency(vec!["a".into(), "b".into(), "a".into()]);
///
/// assert_eq!(not_found.to_string(), "service not found: telemetry");
/// assert_eq!(circular.to_string(), "circular dependency: a -> b -> a");
/// ```
#[derive(Debug, Clone, thiserror::Error)]
pub enum KernelError {
    /// Resolve or operate on a name that was never registered.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// A registration was attempted under a name that is already taken.
    #[error("service already registered: {0}")]
    DuplicateService(String),

    /// A resolved instance could not be downcast to the requested type.
    #[error("type mismatch for: {0}")]
    TypeMismatch(String),

    /// A cycle was found in a dependency graph (includes the offending path).
    #[error("circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// `start` was attempted while a declared dependency is not running.
    #[error("cannot start {service}: dependency {dependency} is not running")]
    DependencyNotRunning {
        /// Service whose start was rejected.
        service: String,
        /// The dependency that is not in the running state.
        dependency: String,
    },

    /// A service's own start/stop/restart implementation failed.
    #[error("{operation} failed for service {service}: {message}")]
    ServiceOperation {
        /// Name of the service the operation ran against.
        service: String,
        /// Which operation failed (`start`, `stop`, or `restart`).
        operation: &'static str,
        /// Message of the underlying error.
        message: String,
    },

    /// A lifecycle phase handler failed; activation was aborted.
    #[error("lifecycle phase {phase} failed: {message}")]
    LifecyclePhase {
        /// Name of the phase that failed.
        phase: String,
        /// Message of the underlying error.
        message: String,
    },

    /// `wait_for` on the event bus did not observe the event in time.
    #[error("timed out after {timeout:?} waiting for {kind} event")]
    WaitTimeout {
        /// Kind of event that was awaited.
        kind: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// Resolve attempted while the container's teardown is in progress.
    #[error("container is disposed")]
    Disposed,

    /// Automatic recovery (deactivate + reactivate) failed; the embedding
    /// host should perform a full reload of the process.
    #[error("recovery failed, host reload required: {0}")]
    RecoveryFailed(String),
}

/// Result type for kernel operations.
///
/// A convenience alias for `Result<T, KernelError>` used throughout
/// orchestron, following the usual crate-specific Result pattern.
pub type KernelResult<T> = Result<T, KernelError>;

/// Boxed error type returned by service implementations.
///
/// Services plug arbitrary business logic into the kernel, so their
/// start/stop/restart contract surfaces errors as boxed trait objects; the
/// registry wraps them into [`KernelError::ServiceOperation`] with the
/// service name and operation attached.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
