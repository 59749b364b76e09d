//! Periodic health evaluation and automatic recovery.
//!
//! The [`HealthMonitor`] ticks on a fixed interval, aggregates per-service
//! health with process-level gauges into a fresh [`HealthCheckResult`], and
//! restarts services whose checks failed. It reports and recovers; it never
//! initiates shutdown.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

use crate::events::{Event, EventBus, EventKind};
use crate::health::{HealthCheckResult, HealthMetrics, HealthState};
use crate::registry::ServiceRegistry;

/// Supplies provider statistics from the embedding host.
///
/// Providers are host-side collaborators (completion sources, data feeds)
/// the kernel does not manage but reports on.
pub trait ProviderStatsSource: Send + Sync {
    /// Number of registered providers per category.
    fn provider_counts(&self) -> BTreeMap<String, usize>;

    /// Whether the provider subsystem considers itself healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Supplies process-level gauges from the embedding host.
pub trait ProcessStatsSource: Send + Sync {
    /// Resident memory in bytes.
    fn memory_usage(&self) -> u64;

    /// CPU utilization fraction in `[0.0, 1.0]`.
    fn cpu_usage(&self) -> f64;

    /// Errors per second over the host's recent window.
    fn error_rate(&self) -> f64;
}

/// Tuning knobs for the monitor.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Time between periodic evaluations.
    pub interval: Duration,
    /// Memory check fails above this many bytes.
    pub memory_threshold: u64,
    /// Error-rate check fails above this many errors per second.
    pub error_rate_threshold: f64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            memory_threshold: 512 * 1024 * 1024,
            error_rate_threshold: 5.0,
        }
    }
}

/// Read-only snapshot for host dashboards, serializable as-is.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardData {
    /// Process-level gauges.
    pub metrics: HealthMetrics,
    /// Current health per registered service.
    pub services: BTreeMap<String, HealthState>,
    /// Provider counts per category, if a provider source is attached.
    pub providers: BTreeMap<String, usize>,
    /// Service-specific gauges, for services exposing the metrics capability.
    pub service_gauges: BTreeMap<String, HashMap<String, f64>>,
    /// The most recent aggregate evaluation, if one has completed.
    pub last_result: Option<HealthCheckResult>,
}

struct MonitorInner {
    registry: Arc<ServiceRegistry>,
    bus: EventBus,
    config: HealthMonitorConfig,
    provider_stats: RwLock<Option<Arc<dyn ProviderStatsSource>>>,
    process_stats: RwLock<Option<Arc<dyn ProcessStatsSource>>>,
    // Held across an entire evaluate-and-recover pass; a tick that finds it
    // taken is skipped rather than queued.
    tick_gate: tokio::sync::Mutex<()>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    last_result: Mutex<Option<HealthCheckResult>>,
    started_at: Mutex<Option<Instant>>,
}

/// Periodic aggregate health evaluator with automatic service recovery.
///
/// Cheap to clone (`Arc`-backed); all clones drive the same monitor.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    /// Creates a monitor over `registry`, publishing on `bus`.
    pub fn new(registry: Arc<ServiceRegistry>, bus: EventBus, config: HealthMonitorConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                registry,
                bus,
                config,
                provider_stats: RwLock::new(None),
                process_stats: RwLock::new(None),
                tick_gate: tokio::sync::Mutex::new(()),
                task: Mutex::new(None),
                last_result: Mutex::new(None),
                started_at: Mutex::new(None),
            }),
        }
    }

    /// Attaches the host's provider statistics source.
    pub fn set_provider_stats(&self, source: Arc<dyn ProviderStatsSource>) {
        *self.inner.provider_stats.write().unwrap() = Some(source);
    }

    /// Attaches the host's process statistics source.
    pub fn set_process_stats(&self, source: Arc<dyn ProcessStatsSource>) {
        *self.inner.process_stats.write().unwrap() = Some(source);
    }

    /// Starts monitoring: one immediate evaluation, then one per configured
    /// interval. Ticks that land while an evaluation is still running are
    /// skipped. No-op if already started.
    pub fn start(&self) {
        let mut task = self.inner.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        *self.inner.started_at.lock().unwrap() = Some(Instant::now());

        let monitor = self.clone();
        let period = self.inner.config.interval;
        *task = Some(tokio::spawn(async move {
            monitor.tick().await;
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first interval tick completes immediately; the immediate
            // evaluation above already covered it.
            interval.tick().await;
            loop {
                interval.tick().await;
                monitor.tick().await;
            }
        }));
        tracing::debug!(interval = ?period, "health monitor started");
    }

    /// Cancels the periodic task. Never stops services. Idempotent.
    pub fn stop(&self) {
        if let Some(task) = self.inner.task.lock().unwrap().take() {
            task.abort();
            tracing::debug!("health monitor stopped");
        }
    }

    /// Alias for [`stop`](Self::stop); the monitor holds no other resources.
    pub fn dispose(&self) {
        self.stop();
    }

    /// Runs one aggregate evaluation and returns the fresh result.
    ///
    /// One check per registered service (a service passes unless it is
    /// unhealthy), plus the process-level `process.providers`,
    /// `process.memory`, and `process.error_rate` checks. Emits
    /// [`EventKind::HealthEvaluated`] and stores the result as the latest.
    pub async fn perform_health_check(&self) -> HealthCheckResult {
        let mut checks = BTreeMap::new();
        let mut errors = Vec::new();

        for name in self.inner.registry.service_names().await {
            let passed = match self.inner.registry.check_health(&name).await {
                Ok(health) => !health.is_unhealthy(),
                Err(err) => {
                    errors.push(format!("{name}: {err}"));
                    false
                }
            };
            checks.insert(name, passed);
        }

        let provider_stats = self.inner.provider_stats.read().unwrap().clone();
        let providers_ok = provider_stats.as_ref().map_or(true, |s| s.is_healthy());
        // Process checks live under a "process." prefix so they can never
        // collide with a service name.
        checks.insert("process.providers".to_string(), providers_ok);
        if !providers_ok {
            errors.push("provider subsystem reports unhealthy".to_string());
        }

        let process_stats = self.inner.process_stats.read().unwrap().clone();
        let memory = process_stats.as_ref().map_or(0, |s| s.memory_usage());
        let memory_ok = memory <= self.inner.config.memory_threshold;
        checks.insert("process.memory".to_string(), memory_ok);
        if !memory_ok {
            errors.push(format!(
                "memory usage {memory} bytes exceeds threshold {}",
                self.inner.config.memory_threshold
            ));
        }

        let error_rate = process_stats.as_ref().map_or(0.0, |s| s.error_rate());
        let rate_ok = error_rate <= self.inner.config.error_rate_threshold;
        checks.insert("process.error_rate".to_string(), rate_ok);
        if !rate_ok {
            errors.push(format!("error rate {error_rate:.2}/s exceeds threshold"));
        }

        let healthy = checks.values().all(|passed| *passed);
        let result = HealthCheckResult {
            healthy,
            checks,
            errors,
            timestamp: SystemTime::now(),
        };

        tracing::debug!(healthy, "health evaluation complete");
        self.inner.bus.emit(
            Event::new(EventKind::HealthEvaluated)
                .with_detail(if healthy { "healthy" } else { "unhealthy" }),
        );
        *self.inner.last_result.lock().unwrap() = Some(result.clone());
        result
    }

    /// Restarts every registered service whose check failed in `result`.
    ///
    /// Restart failures are logged and do not block recovery of the
    /// remaining services. A failed memory check emits
    /// [`EventKind::GcRequested`] as an advisory to the host.
    pub async fn attempt_recovery(&self, result: &HealthCheckResult) {
        for name in result.failed_checks() {
            if !self.inner.registry.has(name).await {
                continue;
            }
            tracing::warn!(service = %name, "restarting unhealthy service");
            self.inner
                .bus
                .emit(Event::new(EventKind::RecoveryAttempted).with_subject(name));
            if let Err(err) = self.inner.registry.restart(name).await {
                tracing::warn!(service = %name, error = %err, "recovery restart failed");
            }
        }

        if result.checks.get("process.memory").is_some_and(|ok| !ok) {
            tracing::warn!("memory above threshold, requesting garbage collection");
            self.inner.bus.emit(Event::new(EventKind::GcRequested));
        }
    }

    /// Process-level gauges, recomputed from the attached sources on read.
    pub fn health_metrics(&self) -> HealthMetrics {
        let process_stats = self.inner.process_stats.read().unwrap().clone();
        HealthMetrics {
            memory_usage: process_stats.as_ref().map_or(0, |s| s.memory_usage()),
            cpu_usage: process_stats.as_ref().map_or(0.0, |s| s.cpu_usage()),
            error_rate: process_stats.as_ref().map_or(0.0, |s| s.error_rate()),
            last_check: self
                .inner
                .last_result
                .lock()
                .unwrap()
                .as_ref()
                .map(|result| result.timestamp),
            uptime: self
                .inner
                .started_at
                .lock()
                .unwrap()
                .map_or(Duration::ZERO, |started| started.elapsed()),
        }
    }

    /// The most recent aggregate evaluation, if one has completed.
    pub fn last_result(&self) -> Option<HealthCheckResult> {
        self.inner.last_result.lock().unwrap().clone()
    }

    /// Builds the dashboard snapshot: gauges, per-service health, provider
    /// counts, and the latest evaluation.
    pub async fn dashboard_data(&self) -> DashboardData {
        let mut services = BTreeMap::new();
        let mut service_gauges = BTreeMap::new();
        for name in self.inner.registry.service_names().await {
            if let Ok(health) = self.inner.registry.check_health(&name).await {
                services.insert(name.clone(), health);
            }
            if let Ok(gauges) = self.inner.registry.service_gauges(&name).await {
                if !gauges.is_empty() {
                    service_gauges.insert(name, gauges);
                }
            }
        }
        let providers = self
            .inner
            .provider_stats
            .read()
            .unwrap()
            .clone()
            .map(|source| source.provider_counts())
            .unwrap_or_default();

        DashboardData {
            metrics: self.health_metrics(),
            services,
            providers,
            service_gauges,
            last_result: self.last_result(),
        }
    }

    async fn tick(&self) {
        let Ok(_gate) = self.inner.tick_gate.try_lock() else {
            tracing::debug!("previous evaluation still running, skipping tick");
            return;
        };
        let result = self.perform_health_check().await;
        if !result.healthy {
            self.attempt_recovery(&result).await;
        }
    }
}
