//! Session types: the server's record of one client connection.
//!
//! A session tracks:
//! - WHO the connection is (`UserIndex`, remote address, account once verified)
//! - WHAT state it is in (connecting, active, closed)
//! - HOW its payloads are scrambled (the current `XorKey`)
//! - role-specific data attached by the server role (the extension)

use std::any::{Any, type_name};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};

use cinder_protocol::{AccountId, PacketWriter, UserIndex, XorKey};
use cinder_transport::{Connection, ConnectionId, TcpConnection};
use tokio::sync::{RwLock, watch};

use crate::SessionError;

/// Stored in `account` while no account is attached.
const NO_ACCOUNT: i64 = i64::MIN;

type Extension = Arc<dyn Any + Send + Sync>;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of a session.
///
/// ```text
///   Connecting ──(registered)──→ Active ──(read error / close)──→ Closed
/// ```
///
/// There is no way back from `Closed`: a closed session is never put back
/// in the registry. Verification and login are flags on an `Active`
/// session, not states of their own, because an active session must be
/// able to receive and reject traffic before either is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Accepted but not yet visible in the registry.
    Connecting = 0,
    /// Registered; its read loop is running.
    Active = 1,
    /// Socket closed. Terminal.
    Closed = 2,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Connecting,
            1 => SessionState::Active,
            _ => SessionState::Closed,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One client connection.
///
/// Sessions are shared as `Arc<Session>` between the registry, the
/// session's own read loop, and any task that wants to send to it. All
/// mutable state is behind atomics or a lock scoped to this session, so
/// nothing here ever needs the registry lock.
pub struct Session {
    index: UserIndex,
    conn: TcpConnection,
    addr: SocketAddr,
    auth_key: u32,
    state: AtomicU8,
    closed_tx: watch::Sender<bool>,
    key: RwLock<XorKey>,
    verified: AtomicBool,
    logged_in: AtomicBool,
    account: AtomicI64,
    extension: RwLock<Option<Extension>>,
}

impl Session {
    pub(crate) fn new(
        index: UserIndex,
        conn: TcpConnection,
        key: XorKey,
        auth_key: u32,
    ) -> Self {
        let addr = conn.peer_addr();
        let (closed_tx, _) = watch::channel(false);
        Self {
            index,
            conn,
            addr,
            auth_key,
            state: AtomicU8::new(SessionState::Connecting as u8),
            closed_tx,
            key: RwLock::new(key),
            verified: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
            account: AtomicI64::new(NO_ACCOUNT),
            extension: RwLock::new(None),
        }
    }

    /// Moves `Connecting → Active`. Has no effect on a closed session.
    pub(crate) fn activate(&self) {
        let _ = self.state.compare_exchange(
            SessionState::Connecting as u8,
            SessionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// The index this session holds in the registry.
    pub fn index(&self) -> UserIndex {
        self.index
    }

    /// Transport-level connection id, unique for the process lifetime.
    pub fn connection_id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// The underlying framed connection.
    pub fn connection(&self) -> &TcpConnection {
        &self.conn
    }

    /// Remote endpoint address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Remote IP address.
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    /// Random key issued at accept; the client echoes it when it proves
    /// which session it owns.
    pub fn auth_key(&self) -> u32 {
        self.auth_key
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `true` while the session is `Active`.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Active
    }

    // -- Obfuscation --------------------------------------------------------

    /// Current payload key.
    pub async fn key(&self) -> XorKey {
        self.key.read().await.clone()
    }

    /// Replaces the payload key, typically once the handshake has agreed
    /// on a new one. Applies to every frame sent or decoded afterwards.
    pub async fn set_key(&self, key: XorKey) {
        *self.key.write().await = key;
    }

    // -- Verification -------------------------------------------------------

    /// Marks the session verified and logged in as `account`.
    pub fn mark_verified(&self, account: AccountId) {
        self.account.store(i64::from(account.0), Ordering::Release);
        self.verified.store(true, Ordering::Release);
        self.logged_in.store(true, Ordering::Release);
        tracing::info!(index = %self.index, %account, addr = %self.addr, "session verified");
    }

    /// Clears the logged-in flag, keeping verification and account.
    pub fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::Release);
    }

    pub fn is_verified(&self) -> bool {
        self.verified.load(Ordering::Acquire)
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    /// The account attached by [`mark_verified`](Self::mark_verified), if any.
    pub fn account(&self) -> Option<AccountId> {
        match self.account.load(Ordering::Acquire) {
            NO_ACCOUNT => None,
            // Only ever stored from an i32.
            raw => Some(AccountId(raw as i32)),
        }
    }

    /// Returns the account if the session is both verified and logged in.
    ///
    /// # Errors
    /// [`SessionError::NotVerified`] otherwise; handlers use this as the
    /// guard in front of privileged opcodes.
    pub fn require_verified(&self) -> Result<AccountId, SessionError> {
        if !self.is_verified() || !self.is_logged_in() {
            return Err(SessionError::NotVerified(self.index));
        }
        self.account().ok_or(SessionError::NotVerified(self.index))
    }

    /// `true` if verified, logged in, and bound to `account`.
    pub fn is_online_as(&self, account: AccountId) -> bool {
        self.is_verified() && self.is_logged_in() && self.account() == Some(account)
    }

    // -- Role extension -----------------------------------------------------

    /// Attaches role-specific data, replacing any previous extension.
    ///
    /// The core never looks inside. Types that are shared with other
    /// sessions' flows should carry their own lock (e.g. a `RwLock`
    /// around the loaded character).
    pub async fn set_extension<T: Any + Send + Sync>(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        *self.extension.write().await = Some(Arc::clone(&value) as Extension);
        value
    }

    /// Returns the attached extension as `T`.
    ///
    /// # Errors
    /// - [`SessionError::ExtensionMissing`] — nothing attached
    /// - [`SessionError::ExtensionMismatch`] — attached value is not a `T`
    pub async fn extension<T: Any + Send + Sync>(&self) -> Result<Arc<T>, SessionError> {
        let slot = self.extension.read().await;
        let ext = slot
            .as_ref()
            .ok_or(SessionError::ExtensionMissing(self.index))?;
        Arc::clone(ext)
            .downcast::<T>()
            .map_err(|_| SessionError::ExtensionMismatch {
                index: self.index,
                expected: type_name::<T>(),
            })
    }

    /// Detaches and returns the extension, if any.
    pub async fn take_extension(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.extension.write().await.take()
    }

    // -- I/O ----------------------------------------------------------------

    /// Encodes `packet` with the session key and writes it to the socket.
    ///
    /// # Errors
    /// - [`SessionError::Closed`] — the session is not active
    /// - [`SessionError::Protocol`] — the frame is too large
    /// - [`SessionError::Transport`] — the write failed
    pub async fn send(&self, packet: &PacketWriter) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Closed(self.index));
        }
        let key = self.key().await;
        let frame = packet.encode(&key)?;
        self.conn.send(&frame).await?;
        Ok(())
    }

    /// Closes the session. Returns `true` only for the call that actually
    /// closed it; every later call is a no-op returning `false`.
    pub async fn close(&self) -> bool {
        let previous = self
            .state
            .swap(SessionState::Closed as u8, Ordering::AcqRel);
        if previous == SessionState::Closed as u8 {
            return false;
        }

        self.closed_tx.send_replace(true);
        if let Err(e) = self.conn.close().await {
            tracing::debug!(index = %self.index, error = %e, "socket shutdown failed");
        }
        tracing::debug!(index = %self.index, addr = %self.addr, "session closed");
        true
    }

    /// Resolves once the session has been closed, from any task.
    ///
    /// The read loop selects on this so an administrative close
    /// interrupts a pending socket read.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // The sender lives as long as `self`, so this only ends on close.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("index", &self.index)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .field("verified", &self.is_verified())
            .field("logged_in", &self.is_logged_in())
            .field("account", &self.account())
            .finish_non_exhaustive()
    }
}
