//! Phased activation and deactivation of the embedding process.
//!
//! The [`LifecycleManager`] walks a fixed, totally ordered sequence of
//! activation phases, awaiting a host-supplied handler at each one, and
//! tears everything down again in reverse on deactivation. Phases are never
//! skipped or reordered; a failing handler aborts the remainder of the
//! activation attempt.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::container::Container;
use crate::error::{BoxError, KernelError, KernelResult};
use crate::events::{Event, EventBus, EventKind};
use crate::monitor::HealthMonitor;
use crate::registry::ServiceRegistry;
use crate::traits::Dispose;

/// Phases of the process lifecycle, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecyclePhase {
    /// Activation begins.
    Initializing,
    /// Probing the host environment.
    DetectingEnvironment,
    /// Loading configuration.
    LoadingConfig,
    /// Building indexes over host data.
    Indexing,
    /// Registering providers; service startup happens here.
    RegisteringProviders,
    /// Starting file and resource watchers.
    StartingWatchers,
    /// Deferred, non-critical initialization.
    InitializingAuxiliary,
    /// Activation complete; the process is serving.
    Ready,
    /// Teardown in progress.
    Deactivating,
    /// Teardown complete.
    Deactivated,
}

impl LifecyclePhase {
    /// The activation phases, in execution order. `Ready` is last.
    pub const ACTIVATION: [LifecyclePhase; 8] = [
        LifecyclePhase::Initializing,
        LifecyclePhase::DetectingEnvironment,
        LifecyclePhase::LoadingConfig,
        LifecyclePhase::Indexing,
        LifecyclePhase::RegisteringProviders,
        LifecyclePhase::StartingWatchers,
        LifecyclePhase::InitializingAuxiliary,
        LifecyclePhase::Ready,
    ];
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::DetectingEnvironment => "detecting_environment",
            Self::LoadingConfig => "loading_config",
            Self::Indexing => "indexing",
            Self::RegisteringProviders => "registering_providers",
            Self::StartingWatchers => "starting_watchers",
            Self::InitializingAuxiliary => "initializing_auxiliary",
            Self::Ready => "ready",
            Self::Deactivating => "deactivating",
            Self::Deactivated => "deactivated",
        };
        f.write_str(s)
    }
}

/// One entry in the append-only phase history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// The phase that was entered.
    pub phase: LifecyclePhase,
    /// When it was entered.
    pub at: SystemTime,
    /// The handler error, if this phase failed.
    pub error: Option<String>,
}

/// Opaque host state forwarded to phase handlers uninterpreted.
pub type HostContext = Arc<dyn Any + Send + Sync>;

type PhaseHandler =
    Arc<dyn Fn(HostContext) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>> + Send + Sync>;

/// Drives the kernel through activation, deactivation, and recovery.
///
/// Owns the composition container, the service registry, and the health
/// monitor; the host hangs its own initialization work on activation phases
/// via [`on_phase`](Self::on_phase).
pub struct LifecycleManager {
    container: Container,
    registry: Arc<ServiceRegistry>,
    monitor: HealthMonitor,
    bus: EventBus,
    handlers: RwLock<HashMap<LifecyclePhase, PhaseHandler>>,
    history: Mutex<Vec<PhaseRecord>>,
    current: Mutex<Option<LifecyclePhase>>,
    ready: AtomicBool,
    host: Mutex<Option<HostContext>>,
    disposables: Mutex<Vec<Arc<dyn Dispose>>>,
}

impl LifecycleManager {
    /// Creates a manager over an already-wired kernel.
    pub fn new(
        container: Container,
        registry: Arc<ServiceRegistry>,
        monitor: HealthMonitor,
        bus: EventBus,
    ) -> Self {
        Self {
            container,
            registry,
            monitor,
            bus,
            handlers: RwLock::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            ready: AtomicBool::new(false),
            host: Mutex::new(None),
            disposables: Mutex::new(Vec::new()),
        }
    }

    /// Registers the handler awaited when `phase` is entered. At most one
    /// handler per phase; a second registration replaces the first.
    pub fn on_phase<F, Fut>(&self, phase: LifecyclePhase, handler: F)
    where
        F: Fn(HostContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler: PhaseHandler = Arc::new(move |host| Box::pin(handler(host)));
        self.handlers.write().unwrap().insert(phase, handler);
    }

    /// Enrolls a value disposed (LIFO) during deactivation.
    pub fn add_disposable(&self, disposable: Arc<dyn Dispose>) {
        self.disposables.lock().unwrap().push(disposable);
    }

    /// Runs every activation phase in order, forwarding `host` to each
    /// phase's handler.
    ///
    /// The `RegisteringProviders` phase additionally starts all registered
    /// services in dependency order. Reaching `Ready` sets the ready flag,
    /// emits [`EventKind::ProcessActivated`], and starts the health monitor.
    ///
    /// A handler error is recorded on that phase's history entry, later
    /// phases do not run, the ready flag stays clear, and the error
    /// propagates as [`KernelError::LifecyclePhase`]. No-op when already
    /// activated.
    pub async fn activate(&self, host: HostContext) -> KernelResult<()> {
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        *self.host.lock().unwrap() = Some(host.clone());
        tracing::info!("activating");

        for phase in LifecyclePhase::ACTIVATION {
            self.enter_phase(phase, &host).await?;
        }

        self.ready.store(true, Ordering::SeqCst);
        self.bus.emit(Event::new(EventKind::ProcessActivated));
        self.monitor.start();
        tracing::info!("activation complete");
        Ok(())
    }

    /// Tears the process down: stops the health monitor, runs enrolled
    /// disposables in LIFO order, stops all services in reverse dependency
    /// order, and resets the container. Service registrations are kept so a
    /// later [`restart`](Self::restart) can bring the same services back up.
    ///
    /// Safe to call before `activate`, after a failed activation, or twice;
    /// teardown failures are logged and teardown continues.
    pub async fn deactivate(&self) -> KernelResult<()> {
        if *self.current.lock().unwrap() == Some(LifecyclePhase::Deactivated) {
            return Ok(());
        }
        self.ready.store(false, Ordering::SeqCst);
        self.record_phase(LifecyclePhase::Deactivating);
        tracing::info!("deactivating");

        self.monitor.stop();

        let disposables: Vec<Arc<dyn Dispose>> = {
            let mut disposables = self.disposables.lock().unwrap();
            disposables.drain(..).collect()
        };
        for disposable in disposables.into_iter().rev() {
            disposable.dispose();
        }

        if let Err(err) = self.registry.stop_all().await {
            tracing::error!(error = %err, "service shutdown failed, continuing");
        }
        self.container.dispose();

        self.record_phase(LifecyclePhase::Deactivated);
        self.bus.emit(Event::new(EventKind::ProcessDeactivated));
        tracing::info!("deactivation complete");
        Ok(())
    }

    /// Full `deactivate` then `activate` with the retained host context.
    ///
    /// Fails with [`KernelError::LifecyclePhase`] if the manager was never
    /// activated (there is no host context to replay).
    pub async fn restart(&self) -> KernelResult<()> {
        let host = self
            .host
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| KernelError::LifecyclePhase {
                phase: "restart".to_string(),
                message: "never activated".to_string(),
            })?;
        self.deactivate().await?;
        self.activate(host).await
    }

    /// Attempts one automatic recovery from a kernel-level error by
    /// restarting the whole lifecycle.
    ///
    /// On failure, emits [`EventKind::ReloadRequested`] so the host knows a
    /// full process reload is required, and returns
    /// [`KernelError::RecoveryFailed`] instead of retrying.
    pub async fn recover_from_error(&self, cause: &KernelError) -> KernelResult<()> {
        tracing::warn!(error = %cause, "attempting automatic recovery");
        match self.restart().await {
            Ok(()) => {
                tracing::info!("recovery succeeded");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "recovery failed, requesting host reload");
                self.bus
                    .emit(Event::new(EventKind::ReloadRequested).with_detail(err.to_string()));
                Err(KernelError::RecoveryFailed(err.to_string()))
            }
        }
    }

    /// The most recently entered phase, if any.
    pub fn current_phase(&self) -> Option<LifecyclePhase> {
        *self.current.lock().unwrap()
    }

    /// The append-only phase history, oldest first.
    pub fn phase_history(&self) -> Vec<PhaseRecord> {
        self.history.lock().unwrap().clone()
    }

    /// Whether the last activation attempt reached `Ready`.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// The registry this manager drives.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// The composition container this manager owns.
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// The bus this manager publishes on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The health monitor started at activation.
    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    async fn enter_phase(&self, phase: LifecyclePhase, host: &HostContext) -> KernelResult<()> {
        self.record_phase(phase);
        tracing::info!(%phase, "entering lifecycle phase");

        if let Err(err) = self.run_phase(phase, host).await {
            if let Some(record) = self.history.lock().unwrap().last_mut() {
                record.error = Some(err.to_string());
            }
            tracing::error!(%phase, error = %err, "lifecycle phase failed");
            return Err(KernelError::LifecyclePhase {
                phase: phase.to_string(),
                message: err.to_string(),
            });
        }
        Ok(())
    }

    async fn run_phase(&self, phase: LifecyclePhase, host: &HostContext) -> Result<(), BoxError> {
        let handler = self.handlers.read().unwrap().get(&phase).cloned();
        if let Some(handler) = handler {
            handler(host.clone()).await?;
        }
        if phase == LifecyclePhase::RegisteringProviders {
            self.registry.start_all().await?;
        }
        Ok(())
    }

    fn record_phase(&self, phase: LifecyclePhase) {
        *self.current.lock().unwrap() = Some(phase);
        self.history.lock().unwrap().push(PhaseRecord {
            phase,
            at: SystemTime::now(),
            error: None,
        });
        self.bus
            .emit(Event::new(EventKind::PhaseEntered).with_subject(phase.to_string()));
    }
}
