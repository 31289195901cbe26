//! The serving end of an RPC link.
//!
//! Handlers are registered by call type before the server starts. Each
//! inbound request runs on its own task, so a slow handler (a database
//! lookup behind `load_character_data`, say) does not hold up other calls
//! on the same link. Responses share the link's writer.
//!
//! When a link closes, its disconnect hooks run only after every request
//! already read from it has finished.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::wire::{self, Outcome, RpcFrame};
use crate::{CallError, RpcCall, RpcConfig, RpcError};

/// Identifies one connected peer for the lifetime of its link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Who sent a request. Passed to every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
}

type Handler = Arc<dyn Fn(PeerInfo, Value) -> BoxFuture<'static, Outcome> + Send + Sync>;
type DisconnectHook = Arc<dyn Fn(PeerInfo) -> BoxFuture<'static, ()> + Send + Sync>;

struct Shared {
    handlers: HashMap<&'static str, Handler>,
    on_disconnect: Vec<DisconnectHook>,
    max_frame_len: usize,
}

/// Accepts RPC links from other roles and answers their calls.
///
/// # Example
///
/// ```rust,ignore
/// let mut server = RpcServer::bind("127.0.0.1:38170", RpcConfig::default()).await?;
/// server.register::<VerifySession, _, _>(|peer, req| async move {
///     Ok(VerifySessionResponse { verified: false, account: None })
/// })?;
/// tokio::spawn(server.run());
/// ```
pub struct RpcServer {
    listener: TcpListener,
    config: RpcConfig,
    handlers: HashMap<&'static str, Handler>,
    on_disconnect: Vec<DisconnectHook>,
}

impl RpcServer {
    /// Binds the listener. Handlers are added before calling
    /// [`run`](Self::run).
    ///
    /// # Errors
    /// [`RpcError::Bind`] if the address is unavailable.
    pub async fn bind(addr: &str, config: RpcConfig) -> Result<Self, RpcError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| RpcError::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        tracing::info!(%addr, "rpc server listening");
        Ok(Self {
            listener,
            config,
            handlers: HashMap::new(),
            on_disconnect: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Registers the handler for call `C`.
    ///
    /// # Errors
    /// [`RpcError::DuplicateCall`] if `C::NAME` already has a handler.
    pub fn register<C, F, Fut>(&mut self, handler: F) -> Result<(), RpcError>
    where
        C: RpcCall,
        F: Fn(PeerInfo, C::Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C::Response, CallError>> + Send + 'static,
    {
        if self.handlers.contains_key(C::NAME) {
            return Err(RpcError::DuplicateCall(C::NAME));
        }

        let handler = Arc::new(handler);
        let erased: Handler = Arc::new(move |peer: PeerInfo, payload: Value| -> BoxFuture<'static, Outcome> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let request: C::Request = match wire::from_value(payload) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!(call = C::NAME, peer = %peer.id, error = %e, "malformed rpc request");
                        return Outcome::Failed(format!("malformed request: {e}"));
                    }
                };
                match handler(peer, request).await {
                    Ok(response) => match wire::to_value(&response) {
                        Ok(value) => Outcome::Ok(value),
                        Err(e) => Outcome::Failed(format!("response encoding failed: {e}")),
                    },
                    Err(e) => Outcome::Failed(e.0),
                }
            })
        });

        self.handlers.insert(C::NAME, erased);
        Ok(())
    }

    /// Registers a hook that runs after a peer's link closes.
    pub fn on_disconnect<F, Fut>(&mut self, hook: F)
    where
        F: Fn(PeerInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_disconnect
            .push(Arc::new(move |peer: PeerInfo| -> BoxFuture<'static, ()> { Box::pin(hook(peer)) }));
    }

    /// Accept loop. Runs until the task is dropped.
    pub async fn run(self) -> Result<(), RpcError> {
        let shared = Arc::new(Shared {
            handlers: self.handlers,
            on_disconnect: self.on_disconnect,
            max_frame_len: self.config.max_frame_len,
        });
        let next_peer = AtomicU64::new(1);

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(error = %e, "rpc accept failed");
                    continue;
                }
            };
            let peer = PeerInfo {
                id: PeerId(next_peer.fetch_add(1, Ordering::Relaxed)),
                addr,
            };
            tracing::info!(peer = %peer.id, %addr, "rpc peer connected");
            tokio::spawn(serve_peer(stream, peer, Arc::clone(&shared)));
        }
    }
}

async fn serve_peer(stream: TcpStream, peer: PeerInfo, shared: Arc<Shared>) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer = %peer.id, error = %e, "set_nodelay failed");
    }
    let (mut read, write) = stream.into_split();
    let writer = Arc::new(Mutex::new(write));
    let mut in_flight = JoinSet::new();

    loop {
        match wire::read_frame(&mut read, shared.max_frame_len).await {
            Ok(Some(RpcFrame::Request { id, call, payload })) => {
                let shared = Arc::clone(&shared);
                let writer = Arc::clone(&writer);
                in_flight.spawn(async move {
                    let outcome = answer(&shared, peer, &call, payload).await;
                    respond(&writer, id, outcome, shared.max_frame_len, peer).await;
                });
            }
            Ok(Some(RpcFrame::Response { id, .. })) => {
                tracing::warn!(peer = %peer.id, id, "ignoring response sent to the serving side");
            }
            Ok(None) => {
                tracing::info!(peer = %peer.id, addr = %peer.addr, "rpc peer disconnected");
                break;
            }
            Err(e) => {
                tracing::warn!(peer = %peer.id, addr = %peer.addr, error = %e, "rpc peer read failed");
                break;
            }
        }
        while in_flight.try_join_next().is_some() {}
    }

    // Disconnect hooks must see the effects of every request the peer
    // got through before it left.
    if !in_flight.is_empty() {
        tracing::debug!(peer = %peer.id, pending = in_flight.len(), "waiting for in-flight requests");
    }
    while in_flight.join_next().await.is_some() {}

    for hook in &shared.on_disconnect {
        hook(peer).await;
    }
}

async fn answer(shared: &Shared, peer: PeerInfo, call: &str, payload: Value) -> Outcome {
    let Some(handler) = shared.handlers.get(call) else {
        tracing::warn!(peer = %peer.id, %call, "unregistered rpc call");
        return Outcome::Unregistered(call.to_owned());
    };

    match AssertUnwindSafe(handler(peer, payload)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::error!(peer = %peer.id, %call, "rpc handler panicked");
            Outcome::Failed(format!("handler for `{call}` panicked"))
        }
    }
}

async fn respond(
    writer: &Mutex<OwnedWriteHalf>,
    id: u64,
    outcome: Outcome,
    max_frame_len: usize,
    peer: PeerInfo,
) {
    let frame = RpcFrame::Response { id, outcome };
    let buf = match wire::encode_frame(&frame, max_frame_len) {
        Ok(buf) => buf,
        Err(RpcError::FrameTooLarge { len, max }) => {
            // Tell the caller instead of leaving it to time out.
            let fallback = RpcFrame::Response {
                id,
                outcome: Outcome::Failed(format!("response of {len} bytes exceeds limit of {max}")),
            };
            match wire::encode_frame(&fallback, max_frame_len) {
                Ok(buf) => buf,
                Err(e) => {
                    tracing::warn!(peer = %peer.id, id, error = %e, "rpc response dropped");
                    return;
                }
            }
        }
        Err(e) => {
            tracing::warn!(peer = %peer.id, id, error = %e, "rpc response dropped");
            return;
        }
    };

    if let Err(e) = writer.lock().await.write_all(&buf).await {
        tracing::debug!(peer = %peer.id, id, error = %e, "rpc response write failed");
    }
}
