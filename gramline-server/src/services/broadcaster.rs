//! Process-wide publish/subscribe hub for workspace-scoped stream events.
//!
//! One broadcaster is constructed at startup and injected into the webhook,
//! send, and streaming handlers. Filtering happens at delivery time against
//! each subscriber's registered workspace: subscriber counts stay in the low
//! hundreds, so a registry scan beats a topic-per-workspace structure.
//!
//! Delivery is best-effort. Events published while a workspace has no open
//! subscriber are lost by contract; clients reconcile through the history
//! fetch path, never through the stream alone.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use shared::models::WorkspaceStreamEvent;

pub type SharedBroadcaster = Arc<WorkspaceBroadcaster>;

struct Subscriber {
    workspace_id: Uuid,
    sender: mpsc::Sender<WorkspaceStreamEvent>,
}

#[derive(Debug)]
pub struct WorkspaceBroadcaster {
    capacity: usize,
    next_id: AtomicU64,
    // Plain mutex: every critical section is a map touch with no awaits, and
    // the subscriber guard must be able to deregister from a sync Drop.
    subscribers: Mutex<HashMap<u64, Subscriber>>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("workspace_id", &self.workspace_id)
            .finish()
    }
}

/// Keeps a subscription registered; dropping it deregisters unconditionally,
/// whichever way the stream ends (client close, cancellation, timeout).
#[derive(Debug)]
pub struct SubscriberGuard {
    id: u64,
    broadcaster: SharedBroadcaster,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

impl WorkspaceBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a subscriber for one workspace and returns its event
    /// receiver plus the guard that owns the registration.
    pub fn subscribe(
        self: &Arc<Self>,
        workspace_id: Uuid,
    ) -> (SubscriberGuard, mpsc::Receiver<WorkspaceStreamEvent>) {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let population = {
            let mut guard = self.subscribers.lock().expect("subscriber registry poisoned");
            guard.insert(
                id,
                Subscriber {
                    workspace_id,
                    sender,
                },
            );
            guard.len()
        };

        gauge!("gramline_stream_subscribers").set(population as f64);
        debug!(subscriber = id, workspace = %workspace_id, "stream subscriber registered");

        (
            SubscriberGuard {
                id,
                broadcaster: Arc::clone(self),
            },
            receiver,
        )
    }

    fn unsubscribe(&self, id: u64) {
        let population = {
            let mut guard = self.subscribers.lock().expect("subscriber registry poisoned");
            guard.remove(&id);
            guard.len()
        };

        gauge!("gramline_stream_subscribers").set(population as f64);
        debug!(subscriber = id, "stream subscriber deregistered");
    }

    /// Delivers an event to every subscriber registered for the workspace.
    ///
    /// Each subscriber has its own bounded buffer and is fed with `try_send`,
    /// so a stalled consumer never blocks the publisher or its peers; its
    /// events are dropped instead (best-effort contract). Closed receivers
    /// are pruned on sight.
    pub fn publish(&self, workspace_id: Uuid, event: &WorkspaceStreamEvent) {
        counter!("gramline_stream_events_published_total", "kind" => event.name()).increment(1);

        let mut closed = Vec::new();
        {
            let guard = self.subscribers.lock().expect("subscriber registry poisoned");
            for (id, subscriber) in guard.iter() {
                if subscriber.workspace_id != workspace_id {
                    continue;
                }

                match subscriber.sender.try_send(event.clone()) {
                    Ok(()) => {
                        counter!("gramline_stream_events_delivered_total").increment(1);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        counter!("gramline_stream_events_dropped_total", "reason" => "full")
                            .increment(1);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(*id);
                    }
                }
            }
        }

        for id in closed {
            self.unsubscribe(id);
        }
    }

    /// Current subscriber population across all workspaces.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .len()
    }
}
