//! The contract the kernel requires of long-lived services.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::BoxError;
use crate::health::HealthState;

/// A long-lived unit of business logic managed by the [`ServiceRegistry`].
///
/// The kernel does not define what a service does internally, only the
/// contract it drives: required `start`/`stop`, plus optional capabilities
/// (native restart, a health probe, a metrics snapshot) exposed through
/// explicit accessors rather than runtime property probing. The default
/// accessors return `None`; a service opts into a capability by overriding
/// the accessor and returning itself.
///
/// `start`/`stop` may be I/O-bound; the registry always awaits them to
/// completion before advancing that service's state, so no two transitions
/// for the same service are ever in flight concurrently.
///
/// [`ServiceRegistry`]: crate::ServiceRegistry
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use orchestron::{BoxError, HealthProbe, HealthState, Service};
///
/// struct FileWatcher;
///
/// #[async_trait]
/// impl Service for FileWatcher {
///     async fn start(&self) -> Result<(), BoxError> {
///         // attach watchers...
///         Ok(())
///     }
///
///     async fn stop(&self) -> Result<(), BoxError> {
///         // detach watchers...
///         Ok(())
///     }
///
///     fn as_health_probe(&self) -> Option<&dyn HealthProbe> {
///         Some(self)
///     }
/// }
///
/// #[async_trait]
/// impl HealthProbe for FileWatcher {
///     async fn health_check(&self) -> Result<HealthState, BoxError> {
///         Ok(HealthState::Healthy)
///     }
/// }
/// ```
#[async_trait]
pub trait Service: Send + Sync {
    /// Start the service. Awaited to completion by the registry.
    async fn start(&self) -> Result<(), BoxError>;

    /// Stop the service. Awaited to completion by the registry.
    async fn stop(&self) -> Result<(), BoxError>;

    /// Native restart capability, if the service has one.
    ///
    /// When `None`, the registry composes `stop` then `start` instead.
    fn as_restartable(&self) -> Option<&dyn Restartable> {
        None
    }

    /// Health probe capability, if the service has one.
    ///
    /// When `None`, the registry derives health from the service's state.
    fn as_health_probe(&self) -> Option<&dyn HealthProbe> {
        None
    }

    /// Metrics snapshot capability, if the service has one.
    fn as_metrics_source(&self) -> Option<&dyn MetricsSource> {
        None
    }
}

/// Capability: a service that knows how to restart itself in place.
#[async_trait]
pub trait Restartable: Send + Sync {
    /// Restart the service without the stop/start round trip.
    async fn restart(&self) -> Result<(), BoxError>;
}

/// Capability: a service that can probe its own runtime condition.
///
/// A probe that returns an error is never propagated; the registry reports
/// the service as [`HealthState::Unhealthy`] instead.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Classify the service's current condition.
    async fn health_check(&self) -> Result<HealthState, BoxError>;
}

/// Capability: a service that exposes named gauges for dashboards.
pub trait MetricsSource: Send + Sync {
    /// A point-in-time snapshot of service-specific gauges.
    fn metrics(&self) -> HashMap<String, f64>;
}
