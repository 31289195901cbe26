//! Connect/disconnect notifications.
//!
//! Subsystems that need to react to sessions coming and going (presence
//! lists, load reporting, party cleanup) subscribe on the registry they
//! were handed. There is no process-wide bus: whoever owns the registry
//! decides who listens.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::Session;

/// A lifecycle change in the registry.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A session was registered and is about to start its read loop.
    Connected(Arc<Session>),
    /// A session was removed from the registry after closing.
    Disconnected(Arc<Session>),
}

impl RegistryEvent {
    /// The session this event is about.
    pub fn session(&self) -> &Arc<Session> {
        match self {
            RegistryEvent::Connected(s) | RegistryEvent::Disconnected(s) => s,
        }
    }
}

/// Handle returned by `subscribe`; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

pub(crate) struct EventBus {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub(crate) async fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().await.push((id, Arc::new(listener)));
        id
    }

    pub(crate) async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Calls every listener with `event`.
    ///
    /// Listeners are copied out first, so one may subscribe or
    /// unsubscribe from inside its callback. A panicking listener is
    /// logged and skipped; it cannot take down the accept loop or a
    /// session supervisor that happens to be publishing.
    pub(crate) async fn publish(&self, event: &RegistryEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .await
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!(
                    index = %event.session().index(),
                    "registry event listener panicked"
                );
            }
        }
    }
}
