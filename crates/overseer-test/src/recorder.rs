//! Records dispatched events for assertions.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use overseer_events::{
    Dispatcher, Event, EventKind, EventPayload, HandlerResult, Outcome, Prefilter, Priority,
};
use tokio::sync::Notify;

#[derive(Default)]
struct Log {
    events: Mutex<Vec<Arc<Event>>>,
    notify: Notify,
}

/// Captures every event of the watched kinds at monitor priority.
#[derive(Clone, Default)]
pub struct EventRecorder {
    log: Arc<Log>,
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("events", &self.len())
            .finish()
    }
}

impl EventRecorder {
    /// Record every event kind.
    #[must_use]
    pub fn attach(dispatcher: &Dispatcher) -> Self {
        Self::attach_kinds(dispatcher, &EventKind::ALL)
    }

    /// Record only `kinds`.
    #[must_use]
    pub fn attach_kinds(dispatcher: &Dispatcher, kinds: &[EventKind]) -> Self {
        let recorder = Self::default();
        for &kind in kinds {
            let log = Arc::clone(&recorder.log);
            let registered = dispatcher.register(
                kind,
                Priority::MONITOR,
                Prefilter::new(),
                move |event: Arc<Event>| {
                    log.events
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(event);
                    log.notify.notify_waiters();
                    async { HandlerResult::Ok(Outcome::NONE) }
                },
            );
            if let Err(err) = registered {
                tracing::error!(error = %err, kind = %kind, "Recorder registration failed");
            }
        }
        recorder
    }

    /// Everything recorded, in dispatch order.
    #[must_use]
    pub fn events(&self) -> Vec<Arc<Event>> {
        self.log
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Kinds recorded, in dispatch order.
    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.kind()).collect()
    }

    /// Recorded payloads of type `T`.
    #[must_use]
    pub fn of<T: EventPayload>(&self) -> Vec<T> {
        self.events()
            .iter()
            .filter_map(|e| T::from_event(e).cloned())
            .collect()
    }

    /// Number of recorded events of `kind`.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }

    /// Total recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.log
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Wait until at least `n` events of `kind` were recorded.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_for(&self, kind: EventKind, n: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.log.notify.notified();
                if self.count(kind) >= n {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}
