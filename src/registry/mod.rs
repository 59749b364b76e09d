//! Service registry: dependency-ordered startup and shutdown for long-lived
//! services, with per-service state machines, health semantics, and metrics.

mod topo;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::events::{Event, EventBus, EventKind};
use crate::health::HealthState;
use crate::traits::Service;

/// Identity and dependency declaration for a registered service.
///
/// Dependency names must themselves be registered before `start`/`start_all`
/// succeeds; an undeclared dependency is a fatal configuration error, not a
/// runtime race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMetadata {
    /// Unique registry key.
    pub name: String,
    /// Informational version string.
    pub version: String,
    /// Names of services that must be running before this one starts.
    pub dependencies: Vec<String>,
}

impl ServiceMetadata {
    /// Creates metadata with no dependencies and version `0.1.0`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "0.1.0".to_string(),
            dependencies: Vec::new(),
        }
    }

    /// Sets the version string.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Declares a dependency on another registered service.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }
}

/// Start/stop state of one registration.
///
/// Mutated only by the registry's start/stop/restart operations, which run to
/// completion (await chain included) before the next operation against the
/// same registration is admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    /// Registered but not running. Initial state.
    Stopped,
    /// `start()` is in flight.
    Starting,
    /// Started successfully.
    Running,
    /// `stop()` is in flight.
    Stopping,
    /// The last start/stop/restart against this service failed.
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Lifetime counters and timing for one registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceMetrics {
    /// Successful starts.
    pub start_count: u64,
    /// Successful stops.
    pub stop_count: u64,
    /// Restarts (native or composed), counted once per restart.
    pub restart_count: u64,
    /// Failed start/stop/restart operations.
    pub error_count: u64,
    /// Wall-clock time of the last successful start.
    pub last_start: Option<SystemTime>,
    /// Wall-clock time of the last successful stop.
    pub last_stop: Option<SystemTime>,
    /// Wall-clock time of the last failed operation.
    pub last_error: Option<SystemTime>,
    /// Total time spent running, accumulated when the service stops.
    pub uptime: Duration,
}

/// Read-only snapshot of one registration.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceRegistrationInfo {
    /// The metadata supplied at registration.
    pub metadata: ServiceMetadata,
    /// Current state.
    pub state: ServiceState,
    /// Current metrics.
    pub metrics: ServiceMetrics,
}

/// Listener invoked on every state transition: `(name, from, to)`.
pub type StateChangeListener = Arc<dyn Fn(&str, ServiceState, ServiceState) + Send + Sync>;

struct RegistrationEntry {
    metadata: ServiceMetadata,
    service: Arc<dyn Service>,
    state: ServiceState,
    metrics: ServiceMetrics,
    started_at: Option<Instant>,
    sequence: u64,
}

/// Registry of long-lived services with dependency-ordered bulk operations.
///
/// One asynchronous mutex guards the registration map across each
/// operation's entire await chain, so state transitions for a given service
/// are strictly ordered and `start_all`/`stop_all` process services
/// sequentially, so a slow dependency blocks its dependents.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use orchestron::{
///     BoxError, EventBus, Service, ServiceMetadata, ServiceRegistry, ServiceState,
/// };
///
/// struct Scanner;
///
/// #[async_trait]
/// impl Service for Scanner {
///     async fn start(&self) -> Result<(), BoxError> { Ok(()) }
///     async fn stop(&self) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> orchestron::KernelResult<()> {
/// let registry = ServiceRegistry::new(EventBus::new());
/// registry.register(ServiceMetadata::new("scanner"), Arc::new(Scanner)).await?;
/// registry.start_all().await?;
/// assert_eq!(registry.state("scanner").await?, ServiceState::Running);
/// # Ok(())
/// # }
/// ```
pub struct ServiceRegistry {
    entries: tokio::sync::Mutex<HashMap<String, RegistrationEntry>>,
    bus: EventBus,
    state_listeners: RwLock<Vec<StateChangeListener>>,
    next_sequence: std::sync::atomic::AtomicU64,
}

impl ServiceRegistry {
    /// Creates an empty registry publishing state changes on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            entries: tokio::sync::Mutex::new(HashMap::new()),
            bus,
            state_listeners: RwLock::new(Vec::new()),
            next_sequence: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Adds a registration in the `Stopped` state.
    ///
    /// Fails with [`KernelError::DuplicateService`] if the name is taken.
    pub async fn register(
        &self,
        metadata: ServiceMetadata,
        service: Arc<dyn Service>,
    ) -> KernelResult<()> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&metadata.name) {
            return Err(KernelError::DuplicateService(metadata.name));
        }
        let name = metadata.name.clone();
        let sequence = self
            .next_sequence
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        entries.insert(
            name.clone(),
            RegistrationEntry {
                metadata,
                service,
                state: ServiceState::Stopped,
                metrics: ServiceMetrics::default(),
                started_at: None,
                sequence,
            },
        );
        drop(entries);
        tracing::debug!(service = %name, "service registered");
        self.bus
            .emit(Event::new(EventKind::ServiceRegistered).with_subject(name));
        Ok(())
    }

    /// Removes a registration, stopping the service first if it is running.
    pub async fn unregister(&self, name: &str) -> KernelResult<()> {
        let running = {
            let entries = self.entries.lock().await;
            let entry = entries
                .get(name)
                .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))?;
            entry.state == ServiceState::Running
        };
        if running {
            self.stop(name).await?;
        }
        let mut entries = self.entries.lock().await;
        entries
            .remove(name)
            .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))?;
        tracing::debug!(service = %name, "service unregistered");
        Ok(())
    }

    /// Starts one service.
    ///
    /// No-op if already running. Fails with
    /// [`KernelError::ServiceNotFound`] for an unknown name or an
    /// unregistered declared dependency, and
    /// [`KernelError::DependencyNotRunning`] when a dependency is not
    /// running. On success the service transitions to `Running` and a health
    /// check is taken; on failure it transitions to `Failed` and the error is
    /// rethrown as [`KernelError::ServiceOperation`].
    pub async fn start(&self, name: &str) -> KernelResult<()> {
        let mut entries = self.entries.lock().await;

        let dependencies = {
            let entry = entries
                .get(name)
                .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))?;
            if entry.state == ServiceState::Running {
                return Ok(());
            }
            entry.metadata.dependencies.clone()
        };
        for dependency in &dependencies {
            let dep_entry = entries
                .get(dependency)
                .ok_or_else(|| KernelError::ServiceNotFound(dependency.clone()))?;
            if dep_entry.state != ServiceState::Running {
                return Err(KernelError::DependencyNotRunning {
                    service: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }

        let entry = entries
            .get_mut(name)
            .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))?;
        self.transition(entry, ServiceState::Starting);
        let service = entry.service.clone();

        match service.start().await {
            Ok(()) => {
                self.transition(entry, ServiceState::Running);
                entry.metrics.start_count += 1;
                entry.metrics.last_start = Some(SystemTime::now());
                entry.started_at = Some(Instant::now());
                let health = Self::probe(&service, ServiceState::Running).await;
                tracing::info!(service = %name, %health, "service started");
                Ok(())
            }
            Err(err) => {
                self.transition(entry, ServiceState::Failed);
                entry.metrics.error_count += 1;
                entry.metrics.last_error = Some(SystemTime::now());
                tracing::error!(service = %name, error = %err, "service failed to start");
                Err(KernelError::ServiceOperation {
                    service: name.to_string(),
                    operation: "start",
                    message: err.to_string(),
                })
            }
        }
    }

    /// Stops one service. No-op unless it is running.
    ///
    /// Accumulates uptime before invoking the service's `stop`; a failing
    /// stop leaves the service `Failed` and rethrows.
    pub async fn stop(&self, name: &str) -> KernelResult<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))?;
        if entry.state != ServiceState::Running {
            return Ok(());
        }

        self.transition(entry, ServiceState::Stopping);
        if let Some(started) = entry.started_at.take() {
            entry.metrics.uptime += started.elapsed();
        }
        let service = entry.service.clone();

        match service.stop().await {
            Ok(()) => {
                self.transition(entry, ServiceState::Stopped);
                entry.metrics.stop_count += 1;
                entry.metrics.last_stop = Some(SystemTime::now());
                tracing::info!(service = %name, "service stopped");
                Ok(())
            }
            Err(err) => {
                self.transition(entry, ServiceState::Failed);
                entry.metrics.error_count += 1;
                entry.metrics.last_error = Some(SystemTime::now());
                tracing::error!(service = %name, error = %err, "service failed to stop");
                Err(KernelError::ServiceOperation {
                    service: name.to_string(),
                    operation: "stop",
                    message: err.to_string(),
                })
            }
        }
    }

    /// Restarts one service.
    ///
    /// Uses the service's native [`Restartable`] capability when present;
    /// otherwise composes `stop` then `start` through the public paths.
    /// Both paths re-validate that declared dependencies are running before
    /// the service goes down, and `restart_count` increments once.
    ///
    /// [`Restartable`]: crate::Restartable
    pub async fn restart(&self, name: &str) -> KernelResult<()> {
        let native = {
            let entries = self.entries.lock().await;
            let entry = entries
                .get(name)
                .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))?;
            entry.service.as_restartable().is_some()
        };

        if !native {
            self.stop(name).await?;
            self.start(name).await?;
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(name) {
                entry.metrics.restart_count += 1;
            }
            return Ok(());
        }

        let mut entries = self.entries.lock().await;
        let dependencies = {
            let entry = entries
                .get(name)
                .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))?;
            entry.metadata.dependencies.clone()
        };
        for dependency in &dependencies {
            let dep_entry = entries
                .get(dependency)
                .ok_or_else(|| KernelError::ServiceNotFound(dependency.clone()))?;
            if dep_entry.state != ServiceState::Running {
                return Err(KernelError::DependencyNotRunning {
                    service: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }

        let entry = entries
            .get_mut(name)
            .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))?;
        self.transition(entry, ServiceState::Stopping);
        if let Some(started) = entry.started_at.take() {
            entry.metrics.uptime += started.elapsed();
        }
        let service = entry.service.clone();

        let outcome = match service.as_restartable() {
            Some(restartable) => restartable.restart().await,
            None => Ok(()),
        };
        match outcome {
            Ok(()) => {
                self.transition(entry, ServiceState::Running);
                entry.metrics.restart_count += 1;
                entry.metrics.last_start = Some(SystemTime::now());
                entry.started_at = Some(Instant::now());
                let health = Self::probe(&service, ServiceState::Running).await;
                tracing::info!(service = %name, %health, "service restarted");
                Ok(())
            }
            Err(err) => {
                self.transition(entry, ServiceState::Failed);
                entry.metrics.error_count += 1;
                entry.metrics.last_error = Some(SystemTime::now());
                tracing::error!(service = %name, error = %err, "service failed to restart");
                Err(KernelError::ServiceOperation {
                    service: name.to_string(),
                    operation: "restart",
                    message: err.to_string(),
                })
            }
        }
    }

    /// Classifies one service's health.
    ///
    /// Uses the service's own probe when the capability is present, deriving
    /// from state otherwise (`Running` → healthy, anything else →
    /// unhealthy). A probe error is reported as unhealthy, never propagated,
    /// and derivation never upgrades a degraded or unhealthy probe result.
    pub async fn check_health(&self, name: &str) -> KernelResult<HealthState> {
        let (service, state) = {
            let entries = self.entries.lock().await;
            let entry = entries
                .get(name)
                .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))?;
            (entry.service.clone(), entry.state)
        };
        Ok(Self::probe(&service, state).await)
    }

    /// Starts every registered service in dependency order.
    ///
    /// A cycle anywhere in the declared graph fails the whole operation with
    /// [`KernelError::CircularDependency`] before any service is touched.
    /// Individual start failures are logged and skipped so the remaining
    /// services still start where dependency order allows.
    pub async fn start_all(&self) -> KernelResult<()> {
        let order = self.execution_order().await?;
        tracing::info!(count = order.len(), "starting all services");
        for name in &order {
            if let Err(err) = self.start(name).await {
                match &err {
                    KernelError::ServiceOperation { .. }
                    | KernelError::DependencyNotRunning { .. } => {
                        tracing::error!(service = %name, error = %err, "continuing startup without service");
                    }
                    _ => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// Stops every service in reverse dependency order, logging and skipping
    /// individual failures.
    pub async fn stop_all(&self) -> KernelResult<()> {
        let mut order = self.execution_order().await?;
        order.reverse();
        tracing::info!(count = order.len(), "stopping all services");
        for name in &order {
            if let Err(err) = self.stop(name).await {
                tracing::error!(service = %name, error = %err, "continuing shutdown without service");
            }
        }
        Ok(())
    }

    /// The dependency-respecting start order over all registrations.
    pub async fn execution_order(&self) -> KernelResult<Vec<String>> {
        let entries = self.entries.lock().await;
        let mut nodes: Vec<(u64, String, Vec<String>)> = entries
            .values()
            .map(|entry| {
                (
                    entry.sequence,
                    entry.metadata.name.clone(),
                    entry.metadata.dependencies.clone(),
                )
            })
            .collect();
        // Registration order keeps the result stable across runs.
        nodes.sort_by_key(|(sequence, _, _)| *sequence);
        let nodes: Vec<(String, Vec<String>)> = nodes
            .into_iter()
            .map(|(_, name, deps)| (name, deps))
            .collect();
        topo::topological_order(&nodes)
    }

    /// Current state of one registration.
    pub async fn state(&self, name: &str) -> KernelResult<ServiceState> {
        let entries = self.entries.lock().await;
        entries
            .get(name)
            .map(|entry| entry.state)
            .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))
    }

    /// Metrics snapshot of one registration.
    pub async fn metrics(&self, name: &str) -> KernelResult<ServiceMetrics> {
        let entries = self.entries.lock().await;
        entries
            .get(name)
            .map(|entry| entry.metrics.clone())
            .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))
    }

    /// Full snapshot of one registration.
    pub async fn registration(&self, name: &str) -> KernelResult<ServiceRegistrationInfo> {
        let entries = self.entries.lock().await;
        entries
            .get(name)
            .map(|entry| ServiceRegistrationInfo {
                metadata: entry.metadata.clone(),
                state: entry.state,
                metrics: entry.metrics.clone(),
            })
            .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))
    }

    /// Names of all registrations in registration order.
    pub async fn service_names(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        let mut names: Vec<(u64, String)> = entries
            .values()
            .map(|entry| (entry.sequence, entry.metadata.name.clone()))
            .collect();
        names.sort_by_key(|(sequence, _)| *sequence);
        names.into_iter().map(|(_, name)| name).collect()
    }

    /// Snapshots of all registrations in registration order.
    pub async fn all_services(&self) -> Vec<ServiceRegistrationInfo> {
        let entries = self.entries.lock().await;
        let mut snapshots: Vec<(u64, ServiceRegistrationInfo)> = entries
            .values()
            .map(|entry| {
                (
                    entry.sequence,
                    ServiceRegistrationInfo {
                        metadata: entry.metadata.clone(),
                        state: entry.state,
                        metrics: entry.metrics.clone(),
                    },
                )
            })
            .collect();
        snapshots.sort_by_key(|(sequence, _)| *sequence);
        snapshots.into_iter().map(|(_, info)| info).collect()
    }

    /// Gauges from one service's metrics capability; empty when the service
    /// does not expose one.
    pub async fn service_gauges(&self, name: &str) -> KernelResult<HashMap<String, f64>> {
        let entries = self.entries.lock().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| KernelError::ServiceNotFound(name.to_string()))?;
        Ok(entry
            .service
            .as_metrics_source()
            .map(|source| source.metrics())
            .unwrap_or_default())
    }

    /// Whether `name` is registered.
    pub async fn has(&self, name: &str) -> bool {
        self.entries.lock().await.contains_key(name)
    }

    /// Registers a listener invoked synchronously on every state transition.
    pub fn on_state_change(&self, listener: StateChangeListener) {
        self.state_listeners.write().unwrap().push(listener);
    }

    /// Stops all services, then clears the registry.
    pub async fn dispose(&self) -> KernelResult<()> {
        self.stop_all().await?;
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn probe(service: &Arc<dyn Service>, state: ServiceState) -> HealthState {
        match service.as_health_probe() {
            Some(probe) => match probe.health_check().await {
                Ok(health) => health,
                Err(err) => {
                    tracing::warn!(error = %err, "health probe failed");
                    HealthState::Unhealthy
                }
            },
            None => {
                if state == ServiceState::Running {
                    HealthState::Healthy
                } else {
                    HealthState::Unhealthy
                }
            }
        }
    }

    fn transition(&self, entry: &mut RegistrationEntry, to: ServiceState) {
        let from = entry.state;
        entry.state = to;
        let name = entry.metadata.name.clone();
        tracing::debug!(service = %name, %from, %to, "state transition");
        self.bus.emit(
            Event::new(EventKind::ServiceStateChanged)
                .with_subject(&name)
                .with_detail(format!("{from} -> {to}")),
        );
        let listeners = self.state_listeners.read().unwrap().clone();
        for listener in listeners {
            listener(&name, from, to);
        }
    }
}
