//! Typed event bus decoupling kernel state changes from observers.
//!
//! The [`EventBus`] is the mechanism by which out-of-scope collaborators
//! (log sinks, telemetry, UI refresh) observe kernel state without the
//! kernel depending on them. Listeners fire synchronously in subscription
//! order; a bounded FIFO history keeps the most recent events for
//! diagnostics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Default number of events retained in the bus history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// Classification of kernel events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A service was added to the registry.
    ///
    /// Sets `subject` to the service name.
    ServiceRegistered,
    /// A service moved between registry states.
    ///
    /// Sets `subject` to the service name and `detail` to `"from -> to"`.
    ServiceStateChanged,
    /// The lifecycle manager entered a phase.
    ///
    /// Sets `subject` to the phase name.
    PhaseEntered,
    /// Activation completed; the process is ready.
    ProcessActivated,
    /// Deactivation completed.
    ProcessDeactivated,
    /// The health monitor finished an evaluation.
    ///
    /// Sets `detail` to `"healthy"` or `"unhealthy"`.
    HealthEvaluated,
    /// The health monitor is restarting an unhealthy service.
    ///
    /// Sets `subject` to the service name.
    RecoveryAttempted,
    /// Advisory: memory is above threshold; the host should collect garbage
    /// if it exposes that capability.
    GcRequested,
    /// Automatic recovery failed; the host should reload the process.
    ReloadRequested,
    /// Host- or collaborator-defined event; `subject` carries the topic.
    Custom,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A single event published on the bus.
///
/// # Examples
///
/// ```rust
/// use orchestron::{Event, EventKind};
///
/// let ev = Event::new(EventKind::ServiceStateChanged)
///     .with_subject("indexer")
///     .with_detail("stopped -> starting");
///
/// assert_eq!(ev.kind, EventKind::ServiceStateChanged);
/// assert_eq!(ev.subject.as_deref(), Some("indexer"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event classification, used for filtered subscriptions.
    pub kind: EventKind,
    /// What the event is about (service name, phase name, custom topic).
    pub subject: Option<String>,
    /// Free-form human-readable context.
    pub detail: Option<String>,
    /// Wall-clock timestamp assigned at construction.
    pub at: SystemTime,
}

impl Event {
    /// Creates an event of the given kind, timestamped now.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            subject: None,
            detail: None,
            at: SystemTime::now(),
        }
    }

    /// Attaches a subject (service name, phase name, topic).
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Attaches free-form detail text.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Identifier returned by subscription calls, used to detach a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

struct ListenerEntry {
    id: u64,
    filter: Option<EventKind>,
    callback: Listener,
}

struct BusInner {
    listeners: RwLock<Vec<ListenerEntry>>,
    once_listeners: Mutex<Vec<ListenerEntry>>,
    history: Mutex<VecDeque<Event>>,
    history_capacity: usize,
    next_id: AtomicU64,
    disposed: AtomicBool,
}

/// In-process publish/subscribe hub with bounded history.
///
/// Cheap to clone (`Arc`-backed); all clones publish to and observe the same
/// underlying bus.
///
/// # Examples
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use orchestron::{Event, EventBus, EventKind};
///
/// let bus = EventBus::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let seen_clone = seen.clone();
/// bus.on_kind(EventKind::ProcessActivated, move |ev| {
///     seen_clone.lock().unwrap().push(ev.kind);
/// });
///
/// bus.emit(Event::new(EventKind::ProcessActivated));
/// bus.emit(Event::new(EventKind::GcRequested)); // filtered out
///
/// assert_eq!(seen.lock().unwrap().len(), 1);
/// assert_eq!(bus.history(None).len(), 2);
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus with the default history capacity.
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Creates a bus retaining at most `capacity` events (clamped to 1).
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                once_listeners: Mutex::new(Vec::new()),
                history: Mutex::new(VecDeque::new()),
                history_capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Publishes an event.
    ///
    /// Fires persistent listeners synchronously in subscription order, then
    /// appends to the bounded history (evicting the oldest entry when full),
    /// then fires and clears one-shot listeners registered for this event's
    /// kind. A no-op after [`dispose`](Self::dispose).
    pub fn emit(&self, event: Event) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return;
        }

        // Snapshot under the read lock, call outside it, so listeners may
        // themselves subscribe, unsubscribe, or emit.
        let snapshot: Vec<Listener> = {
            let listeners = self.inner.listeners.read().unwrap();
            listeners
                .iter()
                .filter(|entry| entry.filter.is_none() || entry.filter == Some(event.kind))
                .map(|entry| entry.callback.clone())
                .collect()
        };
        for callback in snapshot {
            callback(&event);
        }

        {
            let mut history = self.inner.history.lock().unwrap();
            if history.len() == self.inner.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let fired: Vec<Listener> = {
            let mut once = self.inner.once_listeners.lock().unwrap();
            let mut matched = Vec::new();
            once.retain(|entry| {
                if entry.filter == Some(event.kind) {
                    matched.push(entry.callback.clone());
                    false
                } else {
                    true
                }
            });
            matched
        };
        for callback in fired {
            callback(&event);
        }
    }

    /// Publishes an event, then yields once so asynchronous observers that
    /// were woken by a listener get a chance to begin running.
    pub async fn emit_async(&self, event: Event) {
        self.emit(event);
        tokio::task::yield_now().await;
    }

    /// Subscribes to every event.
    pub fn on<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(None, Arc::new(listener))
    }

    /// Subscribes to events of one kind.
    pub fn on_kind<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(Some(kind), Arc::new(listener))
    }

    /// Subscribes to the next event of one kind; the listener is detached
    /// after it fires once.
    pub fn once<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .once_listeners
            .lock()
            .unwrap()
            .push(ListenerEntry {
                id,
                filter: Some(kind),
                callback: Arc::new(listener),
            });
        SubscriptionId(id)
    }

    /// Detaches a listener. Harmless if the listener already fired (one-shot)
    /// or was never registered.
    pub fn off(&self, id: SubscriptionId) {
        self.inner
            .listeners
            .write()
            .unwrap()
            .retain(|entry| entry.id != id.0);
        self.inner
            .once_listeners
            .lock()
            .unwrap()
            .retain(|entry| entry.id != id.0);
    }

    /// Waits for the next event of `kind`, failing with
    /// [`KernelError::WaitTimeout`] if none arrives within `timeout`.
    ///
    /// The internal subscription is detached on both the success and the
    /// timeout path, so a timed-out wait never leaves a dangling listener.
    pub async fn wait_for(&self, kind: EventKind, timeout: Duration) -> KernelResult<Event> {
        let (tx, rx) = tokio::sync::oneshot::channel::<Event>();
        let tx = Mutex::new(Some(tx));
        let id = self.once(kind, move |event| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(event.clone());
            }
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => {
                self.off(id);
                Ok(event)
            }
            _ => {
                self.off(id);
                Err(KernelError::WaitTimeout {
                    kind: kind.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Returns the most recent events, oldest first. `Some(n)` limits the
    /// result to the last `n`.
    pub fn history(&self, last: Option<usize>) -> Vec<Event> {
        let history = self.inner.history.lock().unwrap();
        let skip = last.map_or(0, |n| history.len().saturating_sub(n));
        history.iter().skip(skip).cloned().collect()
    }

    /// Number of attached listeners, one-shot included. Diagnostic accessor.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().unwrap().len()
            + self.inner.once_listeners.lock().unwrap().len()
    }

    /// Detaches all listeners and clears history. Subsequent emits are
    /// dropped. Idempotent.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.listeners.write().unwrap().clear();
        self.inner.once_listeners.lock().unwrap().clear();
        self.inner.history.lock().unwrap().clear();
    }

    fn subscribe(&self, filter: Option<EventKind>, callback: Listener) -> SubscriptionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.write().unwrap().push(ListenerEntry {
            id,
            filter,
            callback,
        });
        SubscriptionId(id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
