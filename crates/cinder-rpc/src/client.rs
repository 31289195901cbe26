//! The calling end of an RPC link.
//!
//! ```text
//!   call() ──→ pending.insert(id, tx) ──→ writer ──────────→ remote
//!                                                              │
//!   caller ←── rx ←── pending.remove(id) ←── read task ←───────┘
//! ```
//!
//! Many tasks may call concurrently over one link. Each request carries
//! a fresh id and its caller parks on a oneshot receiver; the link's read
//! task routes every response to the matching receiver, so responses can
//! arrive in any order. When the link drops, every parked caller is woken
//! with [`RpcError::ConnectionLost`] at once.
//!
//! A call's deadline covers writing the request as well as waiting for
//! the answer. A write that misses it may have left half a frame on the
//! wire, so that link is severed and the supervisor reconnects.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, Notify, RwLock, oneshot, watch};

use crate::wire::{self, Outcome, RpcFrame};
use crate::{RpcCall, RpcConfig, RpcError};

/// The write side of one established link.
#[derive(Clone)]
struct Link {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    /// Fired when a caller gives up mid-write; the supervisor drops the link.
    broken: Arc<Notify>,
}
type ConnectHook = Arc<dyn Fn(RpcClient) -> BoxFuture<'static, ()> + Send + Sync>;

struct Inner {
    addr: SocketAddr,
    config: RpcConfig,
    next_id: AtomicU64,
    link: RwLock<Option<Link>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Outcome>>>,
    hooks: Mutex<Vec<ConnectHook>>,
    shutdown: watch::Sender<bool>,
}

/// A persistent link to another server role.
///
/// Cheap to clone; every clone shares the same link and pending map.
///
/// # Example
///
/// ```rust,ignore
/// let master = RpcClient::connect(master_addr, RpcConfig::default()).await?;
/// let list = master.call::<ServerList>(&ServerListRequest).await?;
/// ```
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    /// Opens the link to `addr`.
    ///
    /// # Errors
    /// [`RpcError::Connect`] if the first connection attempt fails. Once
    /// connected, later drops are handled by the background reconnect
    /// task (when `config.reconnect` is set).
    pub async fn connect(addr: SocketAddr, config: RpcConfig) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| RpcError::Connect { addr, source })?;

        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            addr,
            config,
            next_id: AtomicU64::new(1),
            link: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
            hooks: Mutex::new(Vec::new()),
            shutdown,
        });

        let (read, broken) = inner.install(stream).await;
        tokio::spawn(supervise(Arc::downgrade(&inner), read, broken));
        Ok(Self { inner })
    }

    /// Address of the remote role.
    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// `true` while the link is up.
    pub async fn is_connected(&self) -> bool {
        self.inner.link.read().await.is_some()
    }

    /// Registers a hook that runs every time the link is established.
    ///
    /// If the link is already up the hook also runs once right away. Each
    /// run happens on its own task, so the hook may make calls of its
    /// own (a game server re-announcing itself to the master, say).
    pub async fn on_connect<F, Fut>(&self, hook: F)
    where
        F: Fn(RpcClient) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: ConnectHook =
            Arc::new(move |client: RpcClient| -> BoxFuture<'static, ()> { Box::pin(hook(client)) });
        let mut hooks = self.inner.hooks.lock().await;
        hooks.push(Arc::clone(&hook));
        if self.is_connected().await {
            tokio::spawn(hook(self.clone()));
        }
    }

    /// Calls `C` on the remote role and waits for its response.
    ///
    /// # Errors
    /// - [`RpcError::NotConnected`] — link is down, nothing was sent
    /// - [`RpcError::ConnectionLost`] — link dropped before the answer
    /// - [`RpcError::Timeout`] — not written and answered within
    ///   `call_timeout`; a timed-out write also drops the link
    /// - [`RpcError::Unregistered`] — remote has no handler for `C::NAME`
    /// - [`RpcError::Remote`] — the remote handler reported a failure
    /// - [`RpcError::Codec`] — a record did not (de)serialize
    pub async fn call<C: RpcCall>(&self, request: &C::Request) -> Result<C::Response, RpcError> {
        let link = self
            .inner
            .link
            .read()
            .await
            .clone()
            .ok_or(RpcError::NotConnected)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = RpcFrame::Request {
            id,
            call: C::NAME.to_owned(),
            payload: wire::to_value(request)?,
        };
        let buf = wire::encode_frame(&frame, self.inner.config.max_frame_len)?;

        let after = self.inner.config.call_timeout;
        let deadline = tokio::time::Instant::now() + after;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        let write = async { link.writer.lock().await.write_all(&buf).await };
        match tokio::time::timeout_at(deadline, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.inner.pending.lock().await.remove(&id);
                tracing::debug!(call = C::NAME, id, error = %e, "rpc request write failed");
                return Err(RpcError::ConnectionLost(C::NAME));
            }
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                tracing::warn!(call = C::NAME, id, ?after, "rpc request write timed out, severing link");
                link.broken.notify_one();
                return Err(RpcError::Timeout {
                    call: C::NAME,
                    after,
                });
            }
        }

        let outcome = match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(RpcError::ConnectionLost(C::NAME)),
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                tracing::warn!(call = C::NAME, id, ?after, "rpc call timed out");
                return Err(RpcError::Timeout {
                    call: C::NAME,
                    after,
                });
            }
        };

        match outcome {
            Outcome::Ok(value) => wire::from_value(value),
            Outcome::Unregistered(name) => Err(RpcError::Unregistered(name)),
            Outcome::Failed(message) => Err(RpcError::Remote {
                call: C::NAME,
                message,
            }),
        }
    }

    /// Closes the link for good: no reconnect, in-flight calls fail.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        self.inner.teardown().await;
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("addr", &self.inner.addr)
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Makes `stream` the live link and starts the connect hooks.
    ///
    /// The writer is swapped in under the hooks lock, so a hook added
    /// concurrently by `on_connect` runs exactly once for this link.
    async fn install(self: &Arc<Self>, stream: TcpStream) -> (OwnedReadHalf, Arc<Notify>) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(addr = %self.addr, error = %e, "set_nodelay failed");
        }
        let (read, write) = stream.into_split();
        let broken = Arc::new(Notify::new());

        let hooks = {
            let hooks = self.hooks.lock().await;
            *self.link.write().await = Some(Link {
                writer: Arc::new(Mutex::new(write)),
                broken: Arc::clone(&broken),
            });
            hooks.clone()
        };
        tracing::info!(addr = %self.addr, "rpc link established");

        let client = RpcClient {
            inner: Arc::clone(self),
        };
        for hook in hooks {
            tokio::spawn(hook(client.clone()));
        }
        (read, broken)
    }

    /// Drops the link and fails every call still waiting on it.
    async fn teardown(&self) {
        let link = self.link.write().await.take();
        if let Some(link) = link {
            let _ = link.writer.lock().await.shutdown().await;
        }

        let orphaned: Vec<_> = self.pending.lock().await.drain().collect();
        if !orphaned.is_empty() {
            tracing::warn!(
                addr = %self.addr,
                count = orphaned.len(),
                "rpc link lost with calls in flight"
            );
        }
        // Dropping the senders wakes each caller with ConnectionLost.
    }

    async fn complete(&self, id: u64, outcome: Outcome) {
        match self.pending.lock().await.remove(&id) {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::debug!(id, "response for unknown or expired call"),
        }
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Owns the read half of the link for its whole life, reconnecting when
/// configured to. Holds only a `Weak` so dropping every `RpcClient` ends
/// the task.
async fn supervise(weak: Weak<Inner>, mut read: OwnedReadHalf, mut broken: Arc<Notify>) {
    loop {
        let (max_frame_len, mut shutdown) = match weak.upgrade() {
            Some(inner) => (inner.config.max_frame_len, inner.shutdown.subscribe()),
            None => return,
        };

        tokio::select! {
            () = read_responses(&weak, &mut read, max_frame_len) => {}
            () = broken.notified() => {}
            () = shutdown_requested(&mut shutdown) => {}
        }

        let Some(inner) = weak.upgrade() else { return };
        inner.teardown().await;
        if !inner.config.reconnect || inner.is_shut_down() {
            return;
        }
        let addr = inner.addr;
        let interval = inner.config.reconnect_interval;
        drop(inner);

        (read, broken) = loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = shutdown_requested(&mut shutdown) => return,
            }
            match TcpStream::connect(addr).await {
                Ok(stream) => match weak.upgrade() {
                    Some(inner) if !inner.is_shut_down() => break inner.install(stream).await,
                    _ => return,
                },
                Err(e) => tracing::debug!(%addr, error = %e, "rpc reconnect failed"),
            }
        };
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    // Also resolves if the sender is gone, i.e. the client was dropped.
    let _ = rx.wait_for(|s| *s).await;
}

async fn read_responses(weak: &Weak<Inner>, read: &mut OwnedReadHalf, max_frame_len: usize) {
    loop {
        let frame = match wire::read_frame(read, max_frame_len).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("rpc link closed by remote");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "rpc link read failed");
                return;
            }
        };

        let Some(inner) = weak.upgrade() else { return };
        match frame {
            RpcFrame::Response { id, outcome } => inner.complete(id, outcome).await,
            RpcFrame::Request { id, call, .. } => {
                tracing::warn!(id, %call, "ignoring request sent to the calling side");
            }
        }
    }
}
