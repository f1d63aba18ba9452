//! Event fanout
//!
//! Typed signals with multi-subscriber semantics. Subscribers run
//! synchronously on the emitter's thread in registration order; emission
//! iterates a snapshot of the subscriber list so handlers may connect or
//! disconnect concurrently. A panicking subscriber is logged and never
//! unwinds into the emitter.

use crate::checkable::Checkable;
use crate::check_result::CheckResult;
use crate::comment::Comment;
use crate::downtime::Downtime;
use crate::types::{AcknowledgementType, NotificationType, Origin, StateType};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscriber<T> {
    id: u64,
    callback: Callback<T>,
}

struct SignalInner<T> {
    subscribers: RwLock<Vec<Subscriber<T>>>,
    next_id: AtomicU64,
}

/// A typed multi-subscriber signal
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

impl<T: 'static> Signal<T> {
    /// Register a subscriber. Dropping the returned guard disconnects it.
    pub fn connect<F>(&self, callback: F) -> SignalGuard
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner.subscribers.write().push(Subscriber {
            id,
            callback: Arc::new(callback),
        });

        let inner = Arc::downgrade(&self.inner);

        SignalGuard {
            disconnect: Some(Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.subscribers.write().retain(|s| s.id != id);
                }
            })),
        }
    }

    /// Deliver `event` to every subscriber, in registration order
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Callback<T>> = self
            .inner
            .subscribers
            .read()
            .iter()
            .map(|s| s.callback.clone())
            .collect();

        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::error!(target: "vigil_engine::signals", "signal subscriber panicked");
            }
        }
    }

    /// Number of connected subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

/// Disposer returned by [`Signal::connect`]; disconnects on drop
pub struct SignalGuard {
    disconnect: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SignalGuard {
    /// Disconnect now
    pub fn disconnect(mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }

    /// Keep the subscription alive for the lifetime of the signal
    pub fn detach(mut self) {
        self.disconnect = None;
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }
}

/// A new check result was processed
pub struct CheckResultEvent {
    pub checkable: Arc<Checkable>,
    pub result: Arc<CheckResult>,
    pub origin: Origin,
    /// Monotonic token for idempotent downstream storage
    pub change_id: u64,
}

/// A state change (hard or soft) was detected
pub struct StateChangeEvent {
    pub checkable: Arc<Checkable>,
    pub result: Arc<CheckResult>,
    pub state_type: StateType,
    pub origin: Origin,
}

/// A checkable's result changed the reachability of its children
pub struct ReachabilityEvent {
    pub checkable: Arc<Checkable>,
    pub result: Arc<CheckResult>,
    pub children: Vec<Arc<Checkable>>,
    pub origin: Origin,
}

/// The core wants a notification dispatched
pub struct NotificationRequest {
    pub checkable: Arc<Checkable>,
    pub notification_type: NotificationType,
    pub result: Option<Arc<CheckResult>>,
    pub author: String,
    pub text: String,
    pub origin: Origin,
}

pub struct AcknowledgementSetEvent {
    pub checkable: Arc<Checkable>,
    pub author: String,
    pub comment: String,
    pub ack_type: AcknowledgementType,
    pub notify: bool,
    pub persistent: bool,
    pub expiry: f64,
    pub origin: Origin,
}

pub struct AcknowledgementClearedEvent {
    pub checkable: Arc<Checkable>,
    pub origin: Origin,
}

pub struct CommentEvent {
    pub comment: Arc<Comment>,
}

pub struct DowntimeEvent {
    pub downtime: Arc<Downtime>,
}

pub struct NextCheckEvent {
    pub checkable: Arc<Checkable>,
    pub next_check: f64,
}

pub struct EventCommandEvent {
    pub checkable: Arc<Checkable>,
}

/// The engine's named signals, threaded through construction
#[derive(Default)]
pub struct Signals {
    pub on_new_check_result: Signal<CheckResultEvent>,
    pub on_state_change: Signal<StateChangeEvent>,
    pub on_reachability_changed: Signal<ReachabilityEvent>,
    pub on_notifications_requested: Signal<NotificationRequest>,
    pub on_acknowledgement_set: Signal<AcknowledgementSetEvent>,
    pub on_acknowledgement_cleared: Signal<AcknowledgementClearedEvent>,
    pub on_comment_added: Signal<CommentEvent>,
    pub on_comment_removed: Signal<CommentEvent>,
    pub on_downtime_added: Signal<DowntimeEvent>,
    pub on_downtime_removed: Signal<DowntimeEvent>,
    pub on_downtime_started: Signal<DowntimeEvent>,
    pub on_downtime_triggered: Signal<DowntimeEvent>,
    pub on_next_check_updated: Signal<NextCheckEvent>,
    pub on_event_command_executed: Signal<EventCommandEvent>,
}
