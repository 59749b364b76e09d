use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use orchestron::{
    BoxError, Container, Dispose, EventBus, EventKind, HealthMonitor, HealthMonitorConfig,
    KernelError, LifecycleManager, LifecyclePhase, Service, ServiceMetadata, ServiceRegistry,
    ServiceState,
};

struct Kernel {
    manager: LifecycleManager,
    registry: Arc<ServiceRegistry>,
    bus: EventBus,
}

fn kernel() -> Kernel {
    let bus = EventBus::new();
    let registry = Arc::new(ServiceRegistry::new(bus.clone()));
    let config = HealthMonitorConfig {
        interval: Duration::from_secs(3600),
        ..Default::default()
    };
    let monitor = HealthMonitor::new(registry.clone(), bus.clone(), config);
    let manager = LifecycleManager::new(Container::new(), registry.clone(), monitor, bus.clone());
    Kernel {
        manager,
        registry,
        bus,
    }
}

struct Recorder {
    log: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Service for Recorder {
    async fn start(&self) -> Result<(), BoxError> {
        self.log.lock().unwrap().push("start");
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.log.lock().unwrap().push("stop");
        Ok(())
    }
}

#[tokio::test]
async fn activation_runs_phases_in_order() {
    let kernel = kernel();
    let entered = Arc::new(Mutex::new(Vec::new()));

    for phase in [
        LifecyclePhase::Initializing,
        LifecyclePhase::LoadingConfig,
        LifecyclePhase::StartingWatchers,
        LifecyclePhase::Ready,
    ] {
        let entered = entered.clone();
        kernel.manager.on_phase(phase, move |_| {
            let entered = entered.clone();
            async move {
                entered.lock().unwrap().push(phase);
                Ok(())
            }
        });
    }

    kernel.manager.activate(Arc::new(())).await.unwrap();

    assert_eq!(
        *entered.lock().unwrap(),
        vec![
            LifecyclePhase::Initializing,
            LifecyclePhase::LoadingConfig,
            LifecyclePhase::StartingWatchers,
            LifecyclePhase::Ready,
        ]
    );
    assert!(kernel.manager.is_ready());
    assert_eq!(kernel.manager.current_phase(), Some(LifecyclePhase::Ready));

    let history = kernel.manager.phase_history();
    assert_eq!(history.len(), LifecyclePhase::ACTIVATION.len());
    assert!(history.iter().all(|record| record.error.is_none()));
}

#[tokio::test]
async fn failing_phase_aborts_activation() {
    let kernel = kernel();
    let later_ran = Arc::new(AtomicBool::new(false));

    kernel
        .manager
        .on_phase(LifecyclePhase::LoadingConfig, |_| async {
            Err::<(), BoxError>("config file missing".into())
        });
    let later_ran_clone = later_ran.clone();
    kernel.manager.on_phase(LifecyclePhase::Indexing, move |_| {
        let later_ran = later_ran_clone.clone();
        async move {
            later_ran.store(true, Ordering::SeqCst);
            Ok(())
        }
    });

    let result = kernel.manager.activate(Arc::new(())).await;

    assert!(matches!(
        result,
        Err(KernelError::LifecyclePhase { phase, .. }) if phase == "loading_config"
    ));
    assert!(!kernel.manager.is_ready());
    assert!(!later_ran.load(Ordering::SeqCst));
    assert_eq!(
        kernel.manager.current_phase(),
        Some(LifecyclePhase::LoadingConfig)
    );

    let history = kernel.manager.phase_history();
    let failed = history.last().unwrap();
    assert_eq!(failed.phase, LifecyclePhase::LoadingConfig);
    assert!(failed.error.as_deref().unwrap().contains("config file missing"));
}

#[tokio::test]
async fn registering_providers_starts_registered_services() {
    let kernel = kernel();
    let log = Arc::new(Mutex::new(Vec::new()));

    kernel
        .registry
        .register(
            ServiceMetadata::new("indexer"),
            Arc::new(Recorder { log: log.clone() }),
        )
        .await
        .unwrap();

    kernel.manager.activate(Arc::new(())).await.unwrap();

    assert_eq!(
        kernel.registry.state("indexer").await.unwrap(),
        ServiceState::Running
    );
    assert_eq!(*log.lock().unwrap(), vec!["start"]);
}

struct OrderedDisposable {
    label: &'static str,
    order: Arc<Mutex<Vec<&'static str>>>,
}

impl Dispose for OrderedDisposable {
    fn dispose(&self) {
        self.order.lock().unwrap().push(self.label);
    }
}

#[tokio::test]
async fn deactivation_tears_down_in_reverse() {
    let kernel = kernel();
    let log = Arc::new(Mutex::new(Vec::new()));
    let disposal_order = Arc::new(Mutex::new(Vec::new()));

    kernel
        .registry
        .register(
            ServiceMetadata::new("indexer"),
            Arc::new(Recorder { log: log.clone() }),
        )
        .await
        .unwrap();
    for label in ["cache", "watcher"] {
        kernel.manager.add_disposable(Arc::new(OrderedDisposable {
            label,
            order: disposal_order.clone(),
        }));
    }

    let deactivated = Arc::new(AtomicBool::new(false));
    let deactivated_clone = deactivated.clone();
    kernel.bus.on_kind(EventKind::ProcessDeactivated, move |_| {
        deactivated_clone.store(true, Ordering::SeqCst);
    });

    kernel.manager.activate(Arc::new(())).await.unwrap();
    kernel.manager.deactivate().await.unwrap();

    assert!(!kernel.manager.is_ready());
    assert_eq!(
        kernel.manager.current_phase(),
        Some(LifecyclePhase::Deactivated)
    );
    assert_eq!(*log.lock().unwrap(), vec!["start", "stop"]);
    assert_eq!(*disposal_order.lock().unwrap(), vec!["watcher", "cache"]);
    assert!(deactivated.load(Ordering::SeqCst));
}

#[tokio::test]
async fn deactivate_before_activate_is_safe() {
    let kernel = kernel();

    kernel.manager.deactivate().await.unwrap();
    kernel.manager.deactivate().await.unwrap();

    assert_eq!(
        kernel.manager.current_phase(),
        Some(LifecyclePhase::Deactivated)
    );
    assert!(!kernel.manager.is_ready());
    // Idempotent: the second call records nothing new.
    assert_eq!(kernel.manager.phase_history().len(), 2);
}

#[tokio::test]
async fn restart_replays_the_retained_host_context() {
    let kernel = kernel();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    kernel
        .manager
        .on_phase(LifecyclePhase::LoadingConfig, move |host| {
            let seen = seen_clone.clone();
            async move {
                let workspace = host
                    .downcast_ref::<String>()
                    .ok_or("unexpected host context")?
                    .clone();
                seen.lock().unwrap().push(workspace);
                Ok(())
            }
        });

    let log = Arc::new(Mutex::new(Vec::new()));
    kernel
        .registry
        .register(
            ServiceMetadata::new("indexer"),
            Arc::new(Recorder { log: log.clone() }),
        )
        .await
        .unwrap();

    let host: Arc<String> = Arc::new("workspace-7".to_string());
    kernel.manager.activate(host).await.unwrap();
    kernel.manager.restart().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["workspace-7", "workspace-7"]);
    assert!(kernel.manager.is_ready());

    // Registrations survive the restart and the service is running again.
    assert!(kernel.registry.has("indexer").await);
    assert_eq!(
        kernel.registry.state("indexer").await.unwrap(),
        ServiceState::Running
    );
    assert_eq!(*log.lock().unwrap(), vec!["start", "stop", "start"]);

    // The container is usable again after the teardown half of the restart.
    let container = kernel.manager.container();
    container.register_singleton("port", |_| Ok(Arc::new(4242u16)));
    assert_eq!(*container.resolve::<u16>("port").unwrap(), 4242);
}

#[tokio::test]
async fn restart_without_activation_fails() {
    let kernel = kernel();
    assert!(matches!(
        kernel.manager.restart().await,
        Err(KernelError::LifecyclePhase { .. })
    ));
}

#[tokio::test]
async fn failed_recovery_requests_a_host_reload() {
    let kernel = kernel();
    let attempts = Arc::new(AtomicUsize::new(0));

    // Succeeds on the first activation, fails on every later one.
    let attempts_clone = attempts.clone();
    kernel.manager.on_phase(LifecyclePhase::Indexing, move |_| {
        let attempts = attempts_clone.clone();
        async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err::<(), BoxError>("index corrupted".into())
            }
        }
    });

    let reload_requested = Arc::new(AtomicBool::new(false));
    let reload_clone = reload_requested.clone();
    kernel.bus.on_kind(EventKind::ReloadRequested, move |_| {
        reload_clone.store(true, Ordering::SeqCst);
    });

    kernel.manager.activate(Arc::new(())).await.unwrap();

    let cause = KernelError::ServiceNotFound("indexer".to_string());
    let result = kernel.manager.recover_from_error(&cause).await;

    assert!(matches!(result, Err(KernelError::RecoveryFailed(_))));
    assert!(reload_requested.load(Ordering::SeqCst));
    assert!(!kernel.manager.is_ready());
}
