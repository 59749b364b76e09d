//! # orchestron
//!
//! An embeddable service orchestration kernel.
//!
//! Orchestron coordinates the long-lived services of a host process. It is a
//! library, not a framework: the host constructs the kernel, wires its own
//! services in, and drives activation. Everything is an owned value; there
//! are no ambient globals.
//!
//! ## Features
//!
//! - **Dependency-injection container** with singleton, scoped, and
//!   transient lifetimes, lazy factories, child scopes, and cycle detection
//! - **Typed event bus** with filtered and one-shot subscriptions, awaitable
//!   events, and a bounded diagnostic history
//! - **Service registry** that starts and stops services in dependency
//!   order, tracks per-service state and metrics, and classifies health
//! - **Lifecycle manager** walking a fixed sequence of activation phases
//!   with host-supplied async handlers
//! - **Health monitor** that periodically evaluates aggregate health and
//!   automatically restarts unhealthy services
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use orchestron::{
//!     BoxError, EventBus, HealthMonitor, HealthMonitorConfig, LifecycleManager,
//!     Container, Service, ServiceMetadata, ServiceRegistry, ServiceState,
//! };
//!
//! struct Indexer;
//!
//! #[async_trait]
//! impl Service for Indexer {
//!     async fn start(&self) -> Result<(), BoxError> { Ok(()) }
//!     async fn stop(&self) -> Result<(), BoxError> { Ok(()) }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> orchestron::KernelResult<()> {
//! let bus = EventBus::new();
//! let registry = Arc::new(ServiceRegistry::new(bus.clone()));
//! let monitor = HealthMonitor::new(registry.clone(), bus.clone(), HealthMonitorConfig::default());
//! let manager = LifecycleManager::new(Container::new(), registry.clone(), monitor, bus);
//!
//! registry.register(ServiceMetadata::new("indexer"), Arc::new(Indexer)).await?;
//!
//! manager.activate(Arc::new(())).await?;
//! assert!(manager.is_ready());
//! assert_eq!(registry.state("indexer").await?, ServiceState::Running);
//!
//! manager.deactivate().await?;
//! # Ok(())
//! # }
//! ```

mod container;
mod error;
mod events;
mod health;
mod lifecycle;
mod lifetime;
mod monitor;
mod registry;
mod traits;

pub use container::{AnyArc, Container};
pub use error::{BoxError, KernelError, KernelResult};
pub use events::{Event, EventBus, EventKind, SubscriptionId, DEFAULT_HISTORY_CAPACITY};
pub use health::{HealthCheckResult, HealthMetrics, HealthState};
pub use lifecycle::{HostContext, LifecycleManager, LifecyclePhase, PhaseRecord};
pub use lifetime::Lifetime;
pub use monitor::{
    DashboardData, HealthMonitor, HealthMonitorConfig, ProcessStatsSource, ProviderStatsSource,
};
pub use registry::{
    ServiceMetadata, ServiceMetrics, ServiceRegistrationInfo, ServiceRegistry, ServiceState,
    StateChangeListener,
};
pub use traits::{Dispose, HealthProbe, MetricsSource, Restartable, Service};
