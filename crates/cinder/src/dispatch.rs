//! The opcode → handler table.
//!
//! A server role builds one `DispatchTable` at startup, registering a
//! handler for every client opcode it serves, then hands it to the
//! server. After that the table is read-only and shared by every session
//! task.
//!
//! # Failure isolation
//!
//! ```text
//! handler returns Ok      → Handled
//! handler returns Err     → Failed    (logged, session stays open)
//! handler panics          → Panicked  (logged, caller closes this session)
//! opcode not in the table → Unknown   (logged, packet dropped)
//! opcode registered inert → Inert     (server-to-client only, dropped)
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cinder_protocol::{Opcode, Packet};
use cinder_session::Session;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::{DispatchError, HandlerError};

type BoxHandler =
    Arc<dyn Fn(Arc<Session>, Packet) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

enum Route {
    Handler { name: &'static str, handler: BoxHandler },
    Inert { name: &'static str },
}

impl Route {
    fn name(&self) -> &'static str {
        match self {
            Route::Handler { name, .. } | Route::Inert { name } => name,
        }
    }
}

/// What happened to one inbound packet.
#[derive(Debug)]
pub enum DispatchOutcome {
    Handled,
    Inert,
    Unknown,
    Failed(HandlerError),
    Panicked,
}

/// Routes decoded packets to their handlers by opcode.
///
/// # Example
///
/// ```rust,ignore
/// let mut table = DispatchTable::new();
/// table.register(Opcode(0x0065), "connect_hello", |session, _packet| async move {
///     let mut reply = PacketWriter::new(Opcode(0x0065));
///     reply.write_u32(session.auth_key());
///     session.send(&reply).await?;
///     Ok(())
/// })?;
/// ```
#[derive(Default)]
pub struct DispatchTable {
    routes: HashMap<Opcode, Route>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `opcode`.
    ///
    /// Handlers for one session run one at a time, in arrival order.
    ///
    /// # Errors
    /// [`DispatchError::Duplicate`] if the opcode is already bound,
    /// handler or inert. The table is left unchanged.
    pub fn register<F, Fut>(
        &mut self,
        opcode: Opcode,
        name: &'static str,
        handler: F,
    ) -> Result<(), DispatchError>
    where
        F: Fn(Arc<Session>, Packet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler: BoxHandler = Arc::new(
            move |session: Arc<Session>, packet: Packet| -> BoxFuture<'static, Result<(), HandlerError>> {
                Box::pin(handler(session, packet))
            },
        );
        self.insert(opcode, Route::Handler { name, handler })
    }

    /// Reserves `opcode` for a packet the server only ever sends.
    ///
    /// Clients echoing it back are ignored quietly instead of being
    /// logged as unknown.
    ///
    /// # Errors
    /// [`DispatchError::Duplicate`] if the opcode is already bound.
    pub fn register_inert(&mut self, opcode: Opcode, name: &'static str) -> Result<(), DispatchError> {
        self.insert(opcode, Route::Inert { name })
    }

    fn insert(&mut self, opcode: Opcode, route: Route) -> Result<(), DispatchError> {
        match self.routes.entry(opcode) {
            Entry::Occupied(existing) => Err(DispatchError::Duplicate {
                opcode,
                existing: existing.get().name(),
                name: route.name(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(route);
                Ok(())
            }
        }
    }

    /// Name bound to `opcode`, if any.
    pub fn name(&self, opcode: Opcode) -> Option<&'static str> {
        self.routes.get(&opcode).map(Route::name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Runs the handler for `packet` on `session`.
    ///
    /// Never panics and never returns an error: every failure mode is an
    /// outcome. The caller decides what a [`DispatchOutcome::Panicked`]
    /// means for the session (the server closes it).
    pub async fn dispatch(&self, session: &Arc<Session>, packet: Packet) -> DispatchOutcome {
        let opcode = packet.opcode();
        let index = session.index();

        let (name, handler) = match self.routes.get(&opcode) {
            None => {
                tracing::warn!(
                    %index,
                    %opcode,
                    addr = %session.addr(),
                    len = packet.payload().len(),
                    "unknown opcode, packet dropped"
                );
                return DispatchOutcome::Unknown;
            }
            Some(Route::Inert { name }) => {
                tracing::debug!(%index, %opcode, name, "inert opcode from client ignored");
                return DispatchOutcome::Inert;
            }
            Some(Route::Handler { name, handler }) => (*name, handler),
        };

        // The handler is invoked inside the guarded future so a panic
        // while building its future is caught too.
        let run = async { handler(Arc::clone(session), packet).await };
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(())) => DispatchOutcome::Handled,
            Ok(Err(err)) => {
                match &err {
                    HandlerError::Unauthorized { .. } => tracing::warn!(
                        %index,
                        %opcode,
                        handler = name,
                        account = ?session.account(),
                        addr = %session.addr(),
                        error = %err,
                        "unauthorized packet rejected"
                    ),
                    _ => tracing::warn!(
                        %index,
                        %opcode,
                        handler = name,
                        error = %err,
                        "handler failed"
                    ),
                }
                DispatchOutcome::Failed(err)
            }
            Err(_) => {
                tracing::error!(
                    %index,
                    %opcode,
                    handler = name,
                    addr = %session.addr(),
                    "handler panicked, closing session"
                );
                DispatchOutcome::Panicked
            }
        }
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<(Opcode, &'static str)> =
            self.routes.iter().map(|(op, r)| (*op, r.name())).collect();
        names.sort_by_key(|(op, _)| op.0);
        f.debug_struct("DispatchTable").field("routes", &names).finish()
    }
}
