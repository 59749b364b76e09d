use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use orchestron::{
    BoxError, Event, EventBus, EventKind, HealthProbe, HealthState, KernelError, Restartable,
    Service, ServiceMetadata, ServiceRegistry, ServiceState,
};

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Service for Recorder {
    async fn start(&self) -> Result<(), BoxError> {
        self.log.lock().unwrap().push(format!("start {}", self.name));
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.log.lock().unwrap().push(format!("stop {}", self.name));
        Ok(())
    }
}

struct FailsToStart;

#[async_trait]
impl Service for FailsToStart {
    async fn start(&self) -> Result<(), BoxError> {
        Err("listen address in use".into())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

fn registry() -> ServiceRegistry {
    ServiceRegistry::new(EventBus::new())
}

fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Recorder> {
    Arc::new(Recorder {
        name,
        log: log.clone(),
    })
}

#[tokio::test]
async fn start_all_starts_dependencies_first() {
    let registry = registry();
    let log = Arc::new(Mutex::new(Vec::new()));

    registry
        .register(
            ServiceMetadata::new("api").depends_on("db"),
            recorder("api", &log),
        )
        .await
        .unwrap();
    registry
        .register(ServiceMetadata::new("db"), recorder("db", &log))
        .await
        .unwrap();

    registry.start_all().await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["start db", "start api"]);

    registry.stop_all().await.unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["start db", "start api", "stop api", "stop db"]
    );
}

#[tokio::test]
async fn cycle_fails_before_any_service_is_touched() {
    let registry = registry();
    let log = Arc::new(Mutex::new(Vec::new()));

    registry
        .register(
            ServiceMetadata::new("cache").depends_on("index"),
            recorder("cache", &log),
        )
        .await
        .unwrap();
    registry
        .register(
            ServiceMetadata::new("index").depends_on("cache"),
            recorder("index", &log),
        )
        .await
        .unwrap();

    let result = registry.start_all().await;
    assert!(matches!(result, Err(KernelError::CircularDependency(_))));
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(registry.state("cache").await.unwrap(), ServiceState::Stopped);
    assert_eq!(registry.state("index").await.unwrap(), ServiceState::Stopped);
}

#[tokio::test]
async fn failing_start_marks_the_service_failed() {
    let registry = registry();
    registry
        .register(ServiceMetadata::new("server"), Arc::new(FailsToStart))
        .await
        .unwrap();

    let result = registry.start("server").await;
    assert!(matches!(
        result,
        Err(KernelError::ServiceOperation { operation: "start", .. })
    ));

    assert_eq!(registry.state("server").await.unwrap(), ServiceState::Failed);
    let metrics = registry.metrics("server").await.unwrap();
    assert_eq!(metrics.error_count, 1);
    assert_eq!(metrics.start_count, 0);
    assert!(metrics.last_error.is_some());

    // Health classification reports, never throws.
    let health = registry.check_health("server").await.unwrap();
    assert_eq!(health, HealthState::Unhealthy);
}

#[tokio::test]
async fn start_requires_running_dependencies() {
    let registry = registry();
    let log = Arc::new(Mutex::new(Vec::new()));

    registry
        .register(ServiceMetadata::new("db"), recorder("db", &log))
        .await
        .unwrap();
    registry
        .register(
            ServiceMetadata::new("api").depends_on("db"),
            recorder("api", &log),
        )
        .await
        .unwrap();

    let result = registry.start("api").await;
    assert!(matches!(
        result,
        Err(KernelError::DependencyNotRunning { service, dependency })
            if service == "api" && dependency == "db"
    ));

    registry.start("db").await.unwrap();
    registry.start("api").await.unwrap();
    assert_eq!(registry.state("api").await.unwrap(), ServiceState::Running);
}

#[tokio::test]
async fn start_all_continues_past_individual_failures() {
    let registry = registry();
    let log = Arc::new(Mutex::new(Vec::new()));

    registry
        .register(ServiceMetadata::new("broken"), Arc::new(FailsToStart))
        .await
        .unwrap();
    registry
        .register(ServiceMetadata::new("watcher"), recorder("watcher", &log))
        .await
        .unwrap();

    registry.start_all().await.unwrap();

    assert_eq!(registry.state("broken").await.unwrap(), ServiceState::Failed);
    assert_eq!(
        registry.state("watcher").await.unwrap(),
        ServiceState::Running
    );
}

struct InPlaceRestarter {
    restarts: AtomicUsize,
    starts: AtomicUsize,
}

#[async_trait]
impl Service for InPlaceRestarter {
    async fn start(&self) -> Result<(), BoxError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn as_restartable(&self) -> Option<&dyn Restartable> {
        Some(self)
    }
}

#[async_trait]
impl Restartable for InPlaceRestarter {
    async fn restart(&self) -> Result<(), BoxError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn restart_prefers_the_native_capability() {
    let registry = registry();
    let service = Arc::new(InPlaceRestarter {
        restarts: AtomicUsize::new(0),
        starts: AtomicUsize::new(0),
    });
    registry
        .register(ServiceMetadata::new("daemon"), service.clone())
        .await
        .unwrap();

    registry.start("daemon").await.unwrap();
    registry.restart("daemon").await.unwrap();

    assert_eq!(service.restarts.load(Ordering::SeqCst), 1);
    // The native path never re-enters start.
    assert_eq!(service.starts.load(Ordering::SeqCst), 1);
    assert_eq!(registry.state("daemon").await.unwrap(), ServiceState::Running);
    assert_eq!(registry.metrics("daemon").await.unwrap().restart_count, 1);
}

#[tokio::test]
async fn native_restart_requires_running_dependencies() {
    let registry = registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    let service = Arc::new(InPlaceRestarter {
        restarts: AtomicUsize::new(0),
        starts: AtomicUsize::new(0),
    });

    registry
        .register(ServiceMetadata::new("db"), recorder("db", &log))
        .await
        .unwrap();
    registry
        .register(
            ServiceMetadata::new("daemon").depends_on("db"),
            service.clone(),
        )
        .await
        .unwrap();
    registry.start_all().await.unwrap();

    registry.stop("db").await.unwrap();
    let result = registry.restart("daemon").await;

    assert!(matches!(
        result,
        Err(KernelError::DependencyNotRunning { service, dependency })
            if service == "daemon" && dependency == "db"
    ));
    // Validation happens before the service comes down.
    assert_eq!(registry.state("daemon").await.unwrap(), ServiceState::Running);
    assert_eq!(service.restarts.load(Ordering::SeqCst), 0);
    assert_eq!(registry.metrics("daemon").await.unwrap().restart_count, 0);
}

#[tokio::test]
async fn restart_falls_back_to_stop_then_start() {
    let registry = registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry
        .register(ServiceMetadata::new("cache"), recorder("cache", &log))
        .await
        .unwrap();

    registry.start("cache").await.unwrap();
    registry.restart("cache").await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["start cache", "stop cache", "start cache"]
    );
    let metrics = registry.metrics("cache").await.unwrap();
    assert_eq!(metrics.restart_count, 1);
    assert_eq!(metrics.start_count, 2);
    assert_eq!(metrics.stop_count, 1);
}

#[tokio::test]
async fn starting_a_running_service_is_a_noop() {
    let registry = registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry
        .register(ServiceMetadata::new("db"), recorder("db", &log))
        .await
        .unwrap();

    registry.start("db").await.unwrap();
    registry.start("db").await.unwrap();

    assert_eq!(log.lock().unwrap().len(), 1);
    assert_eq!(registry.metrics("db").await.unwrap().start_count, 1);
}

#[tokio::test]
async fn unregister_stops_a_running_service() {
    let registry = registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry
        .register(ServiceMetadata::new("db"), recorder("db", &log))
        .await
        .unwrap();

    registry.start("db").await.unwrap();
    registry.unregister("db").await.unwrap();

    assert!(!registry.has("db").await);
    assert_eq!(*log.lock().unwrap(), vec!["start db", "stop db"]);
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let registry = registry();
    let log = Arc::new(Mutex::new(Vec::new()));

    registry
        .register(ServiceMetadata::new("db"), recorder("db", &log))
        .await
        .unwrap();
    let result = registry
        .register(ServiceMetadata::new("db"), recorder("db", &log))
        .await;

    assert!(matches!(
        result,
        Err(KernelError::DuplicateService(name)) if name == "db"
    ));
}

struct DegradedProbe;

#[async_trait]
impl Service for DegradedProbe {
    async fn start(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn as_health_probe(&self) -> Option<&dyn HealthProbe> {
        Some(self)
    }
}

#[async_trait]
impl HealthProbe for DegradedProbe {
    async fn health_check(&self) -> Result<HealthState, BoxError> {
        Ok(HealthState::Degraded)
    }
}

#[tokio::test]
async fn probe_results_are_never_upgraded() {
    let registry = registry();
    registry
        .register(ServiceMetadata::new("feed"), Arc::new(DegradedProbe))
        .await
        .unwrap();

    registry.start("feed").await.unwrap();
    // Running state does not override what the probe says.
    let health = registry.check_health("feed").await.unwrap();
    assert_eq!(health, HealthState::Degraded);
}

#[tokio::test]
async fn transitions_are_published_on_the_bus() {
    let bus = EventBus::new();
    let registry = ServiceRegistry::new(bus.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let transitions_clone = transitions.clone();
    bus.on_kind(EventKind::ServiceStateChanged, move |event: &Event| {
        transitions_clone
            .lock()
            .unwrap()
            .push(event.detail.clone().unwrap_or_default());
    });

    registry
        .register(ServiceMetadata::new("db"), recorder("db", &log))
        .await
        .unwrap();
    registry.start("db").await.unwrap();

    assert_eq!(
        *transitions.lock().unwrap(),
        vec!["stopped -> starting", "starting -> running"]
    );
}

#[tokio::test]
async fn local_listeners_observe_transitions() {
    let registry = registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    registry.on_state_change(Arc::new(move |name, from, to| {
        seen_clone
            .lock()
            .unwrap()
            .push(format!("{name}: {from} -> {to}"));
    }));

    registry
        .register(ServiceMetadata::new("db"), recorder("db", &log))
        .await
        .unwrap();
    registry.start("db").await.unwrap();
    registry.stop("db").await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "db: stopped -> starting",
            "db: starting -> running",
            "db: running -> stopping",
            "db: stopping -> stopped",
        ]
    );
}
