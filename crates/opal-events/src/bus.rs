//! Multi-subscriber event bus.
//!
//! The bus fans [`AgentEvent`]s out to two kinds of consumers:
//!
//! - **Listeners** ([`EventListener`]) — invoked inline, exactly once per
//!   event, in registration order, serialized per session.  A panicking
//!   listener is recovered and logged; the remaining listeners still run.
//! - **Subscribers** — bounded [`tokio::sync::mpsc`] queues keyed by session,
//!   used by streaming sinks (SSE).  A subscriber that cannot keep up is
//!   dropped with a disconnect notice rather than stalling the engine.
//!
//! Events pass through the [`DedupPipeline`] before any fan-out.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};

use crate::dedup::DedupPipeline;
use crate::event::{AgentEvent, EventListener};

/// Handle returned by [`EventBus::register`]; pass to
/// [`EventBus::unregister`] to detach the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    listener: Arc<dyn EventListener>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<AgentEvent>>,
}

struct BusInner {
    /// Registered listeners in registration order.
    listeners: std::sync::RwLock<Vec<Registration>>,

    /// Streaming subscribers keyed by session id.
    subscribers: DashMap<String, Vec<Subscriber>>,

    /// Per-session delivery locks; delivery order equals publish order.
    session_locks: DashMap<String, Arc<Mutex<()>>>,

    dedup: DedupPipeline,
    next_id: AtomicU64,
}

/// Cheaply cloneable fan-out bus (`Arc`-backed, `Send + Sync`).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: std::sync::RwLock::new(Vec::new()),
                subscribers: DashMap::new(),
                session_locks: DashMap::new(),
                dedup: DedupPipeline::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Attach a listener.  Listeners observe events from all sessions.
    pub fn register(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.inner.listeners.write().expect("listener lock poisoned");
        listeners.push(Registration { id, listener });
        id
    }

    /// Detach a previously registered listener.
    pub fn unregister(&self, id: ListenerId) {
        let mut listeners = self.inner.listeners.write().expect("listener lock poisoned");
        listeners.retain(|r| r.id != id);
    }

    /// Open a bounded subscription for one session's events.
    ///
    /// If the subscriber falls `capacity` events behind it is disconnected;
    /// the receiver observes the channel closing.
    pub fn subscribe(&self, session_id: &str, capacity: usize) -> mpsc::Receiver<Arc<AgentEvent>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .entry(session_id.to_owned())
            .or_default()
            .push(Subscriber { id, tx });
        tracing::debug!(session_id, subscriber = id, "subscriber attached");
        rx
    }

    /// Publish one event: dedup, then deliver to listeners (in order) and
    /// subscriber queues.  Returns the number of consumers that observed it,
    /// or 0 when the dedup pipeline dropped it.
    pub async fn publish(&self, event: AgentEvent) -> usize {
        if !self.inner.dedup.admit(&event) {
            tracing::debug!(
                session_id = %event.session_id,
                event_type = event.event_type(),
                "duplicate event dropped"
            );
            return 0;
        }

        let lock = self
            .inner
            .session_locks
            .entry(event.session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let event = Arc::new(event);
        let mut delivered = 0;

        // Snapshot the registration list so no lock is held across awaits.
        let listeners: Vec<(String, Arc<dyn EventListener>)> = {
            let guard = self.inner.listeners.read().expect("listener lock poisoned");
            guard
                .iter()
                .map(|r| (r.listener.name().to_owned(), Arc::clone(&r.listener)))
                .collect()
        };

        for (name, listener) in listeners {
            let fut = AssertUnwindSafe(listener.on_event(&event)).catch_unwind();
            match fut.await {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    tracing::error!(
                        listener = %name,
                        event_type = event.event_type(),
                        panic = %panic_message(&panic),
                        "listener panicked; continuing with remaining listeners"
                    );
                }
            }
        }

        delivered += self.forward_to_subscribers(&event);
        delivered
    }

    /// Drop all per-session state (subscribers, dedup keys, delivery lock).
    pub fn clear_session(&self, session_id: &str) {
        self.inner.subscribers.remove(session_id);
        self.inner.session_locks.remove(session_id);
        self.inner.dedup.clear_session(session_id);
    }

    fn forward_to_subscribers(&self, event: &Arc<AgentEvent>) -> usize {
        let Some(mut subs) = self.inner.subscribers.get_mut(&event.session_id) else {
            return 0;
        };

        let mut delivered = 0;
        subs.retain(|sub| match sub.tx.try_send(Arc::clone(event)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    session_id = %event.session_id,
                    subscriber = sub.id,
                    "subscriber queue overflowed; dropping subscriber"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(
                    session_id = %event.session_id,
                    subscriber = sub.id,
                    "subscriber disconnected"
                );
                false
            }
        });
        delivered
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
