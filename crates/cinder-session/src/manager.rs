//! The connection registry: every live session in the process.
//!
//! This is the single source of truth for "is user X online". It is
//! responsible for:
//! - Allocating a user index for each new connection and recycling
//!   indexes once their session is gone
//! - Looking sessions up by index or by account
//! - Sending to one session or broadcasting to all of them
//! - Removing closed sessions and announcing connect/disconnect
//!
//! # Concurrency note
//!
//! The index → session map sits behind one `RwLock`. Lookups take the read
//! side; inserts and removals take the write side. The lock is never held
//! across socket I/O: sends clone the `Arc<Session>` out, release the lock,
//! then write. Per-session state has its own synchronization (see
//! [`Session`]), so a slow handler on one session never stalls the map.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use cinder_protocol::{AccountId, PacketWriter, UserIndex, XorKey};
use cinder_transport::{Connection, TcpConnection};
use futures_util::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::events::EventBus;
use crate::{RegistryError, RegistryEvent, Session, SubscriptionId};

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Configuration for the connection registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Size of the user index space. Indexes `0..capacity` are handed out.
    ///
    /// Default: `u16::MAX`, i.e. every value except
    /// [`UserIndex::INVALID`].
    pub capacity: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { capacity: u16::MAX }
    }
}

// ---------------------------------------------------------------------------
// Index allocation
// ---------------------------------------------------------------------------

/// Finds the first free index at or after `cursor`, wrapping around once.
///
/// Starting from a moving cursor rather than zero keeps a just-released
/// index out of circulation for as long as possible, so a late packet
/// addressed to an old session is unlikely to reach its successor.
fn next_free(
    cursor: u16,
    capacity: u16,
    is_taken: impl Fn(UserIndex) -> bool,
) -> Option<UserIndex> {
    let capacity = u32::from(capacity);
    (0..capacity)
        .map(|step| UserIndex(((u32::from(cursor) + step) % capacity) as u16))
        .find(|candidate| !is_taken(*candidate))
}

struct Slots {
    sessions: HashMap<UserIndex, Arc<Session>>,
    cursor: u16,
}

impl Slots {
    fn allocate(&mut self, capacity: u16) -> Option<UserIndex> {
        let index = next_free(self.cursor, capacity, |i| self.sessions.contains_key(&i))?;
        self.cursor = ((u32::from(index.0) + 1) % u32::from(capacity)) as u16;
        Some(index)
    }
}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

/// The process-wide set of live sessions.
///
/// Construct one at startup, wrap it in an `Arc`, and hand it to every
/// component that needs it.
///
/// ## Lifecycle
///
/// ```text
/// register() ──→ [Active] ──→ close() / read error ──→ release()
///     │                                                  │
///     ▼                                                  ▼
///  Connected event                               Disconnected event
///                                               (index free for reuse)
/// ```
pub struct ConnectionRegistry {
    slots: RwLock<Slots>,
    config: RegistryConfig,
    initial_key: XorKey,
    events: EventBus,
}

impl ConnectionRegistry {
    /// Creates an empty registry. New sessions start with `initial_key`.
    pub fn new(config: RegistryConfig, initial_key: XorKey) -> Self {
        Self {
            slots: RwLock::new(Slots {
                sessions: HashMap::new(),
                cursor: 0,
            }),
            config,
            initial_key,
            events: EventBus::new(),
        }
    }

    /// Size of the index space.
    pub fn capacity(&self) -> u16 {
        self.config.capacity
    }

    /// Registers an accepted connection as a new active session.
    ///
    /// Allocation and insertion happen under a single write lock, so two
    /// concurrent accepts can never be handed the same index. Subscribers
    /// see [`RegistryEvent::Connected`] before this returns.
    ///
    /// # Errors
    /// [`RegistryError::Exhausted`] if every index is in use. The
    /// connection is closed; the registry is left unchanged.
    pub async fn register(
        &self,
        conn: TcpConnection,
    ) -> Result<Arc<Session>, RegistryError> {
        let auth_key: u32 = rand::rng().random();

        let mut slots = self.slots.write().await;
        let Some(index) = slots.allocate(self.config.capacity) else {
            drop(slots);
            tracing::error!(
                addr = %conn.peer_addr(),
                capacity = self.config.capacity,
                "can't find any available user index"
            );
            let _ = conn.close().await;
            return Err(RegistryError::Exhausted {
                capacity: self.config.capacity,
            });
        };

        let session = Arc::new(Session::new(
            index,
            conn,
            self.initial_key.clone(),
            auth_key,
        ));
        slots.sessions.insert(index, Arc::clone(&session));
        drop(slots);

        session.activate();
        tracing::info!(%index, addr = %session.addr(), "session registered");

        self.events
            .publish(&RegistryEvent::Connected(Arc::clone(&session)))
            .await;
        Ok(session)
    }

    /// Looks up a live session by index. `None` is a normal outcome.
    pub async fn lookup(&self, index: UserIndex) -> Option<Arc<Session>> {
        self.slots.read().await.sessions.get(&index).cloned()
    }

    /// Returns the index of the connected session logged in as
    /// `account`, or [`UserIndex::INVALID`] if there is none. A session
    /// that is closed but not yet released does not count.
    pub async fn is_online(&self, account: AccountId) -> UserIndex {
        self.slots
            .read()
            .await
            .sessions
            .values()
            .find(|s| s.is_connected() && s.is_online_as(account))
            .map(|s| s.index())
            .unwrap_or(UserIndex::INVALID)
    }

    /// Marks session `index` verified as `account`, but only if the
    /// presented auth key and remote IP both match what the session was
    /// issued at accept.
    pub async fn verify_user(
        &self,
        index: UserIndex,
        auth_key: u32,
        ip: IpAddr,
        account: AccountId,
    ) -> bool {
        let Some(session) = self.lookup(index).await else {
            return false;
        };
        if !session.is_connected() || session.auth_key() != auth_key || session.ip() != ip {
            tracing::warn!(
                %index,
                %account,
                addr = %session.addr(),
                presented_ip = %ip,
                "session verification rejected"
            );
            return false;
        }
        session.mark_verified(account);
        true
    }

    /// Sends `packet` to session `index`.
    ///
    /// Returns `false` if the index is absent, the session is not
    /// connected, or the write failed. Never raises.
    pub async fn send_to(&self, index: UserIndex, packet: &PacketWriter) -> bool {
        let Some(session) = self.lookup(index).await else {
            return false;
        };
        if !session.is_connected() {
            return false;
        }
        match session.send(packet).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(%index, error = %e, "send_to failed");
                false
            }
        }
    }

    /// Sends `packet` to every connected session except `except`.
    ///
    /// Works on a snapshot taken at the start: a session that closes
    /// mid-broadcast is skipped, and one that connects mid-broadcast may
    /// or may not be reached. Returns how many sessions the write
    /// succeeded for.
    pub async fn broadcast(&self, packet: &PacketWriter, except: Option<UserIndex>) -> usize {
        let targets: Vec<Arc<Session>> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|s| Some(s.index()) != except && s.is_connected())
            .collect();

        join_all(targets.iter().map(|s| s.send(packet)))
            .await
            .into_iter()
            .filter(Result::is_ok)
            .count()
    }

    /// Closes session `index`. Returns `false` if it was not registered.
    ///
    /// Closing an already-closed session is a no-op. The read loop
    /// notices the close and releases the slot.
    pub async fn close_user(&self, index: UserIndex) -> bool {
        match self.lookup(index).await {
            Some(session) => {
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// Deletes the entry for `index`, returning it if there was one.
    ///
    /// Idempotent. Does not close the socket or publish an event; session
    /// supervisors use [`release`](Self::release) instead.
    pub async fn remove(&self, index: UserIndex) -> Option<Arc<Session>> {
        self.slots.write().await.sessions.remove(&index)
    }

    /// Final cleanup for a session whose read loop has ended.
    ///
    /// Closes it if still open, removes its entry (only if the entry is
    /// still this very session), frees the index, and publishes
    /// [`RegistryEvent::Disconnected`]. Returns `true` if an entry was
    /// removed; a second call for the same session does nothing.
    pub async fn release(&self, session: &Arc<Session>) -> bool {
        session.close().await;

        let removed = {
            let mut slots = self.slots.write().await;
            match slots.sessions.get(&session.index()) {
                Some(current) if Arc::ptr_eq(current, session) => {
                    slots.sessions.remove(&session.index());
                    true
                }
                _ => false,
            }
        };

        if removed {
            tracing::info!(index = %session.index(), addr = %session.addr(), "session released");
            self.events
                .publish(&RegistryEvent::Disconnected(Arc::clone(session)))
                .await;
        }
        removed
    }

    /// Number of registered sessions. Advisory: it may be stale by the
    /// time the caller looks at it.
    pub async fn count(&self) -> usize {
        self.slots.read().await.sessions.len()
    }

    /// A point-in-time copy of every registered session.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.slots.read().await.sessions.values().cloned().collect()
    }

    /// Runs `visit` for each registered session under the read lock.
    ///
    /// `visit` is synchronous so it cannot block on I/O while the lock
    /// is held; use [`snapshot`](Self::snapshot) for anything async.
    pub async fn visit<F>(&self, mut visit: F)
    where
        F: FnMut(&Arc<Session>),
    {
        let slots = self.slots.read().await;
        for session in slots.sessions.values() {
            visit(session);
        }
    }

    /// Registers a connect/disconnect listener.
    pub async fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener).await
    }

    /// Removes a listener. Returns `false` if it was already gone.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id).await
    }
}

// =========================================================================
// Tests
// =========================================================================
