//! Per-session read loop and its supervisor.
//!
//! Each registered session gets two Tokio tasks:
//!   1. the read loop: receive frame → decode with the session key →
//!      dispatch, strictly one packet at a time
//!   2. a supervisor that waits for the read loop to end, however it
//!      ends, and then releases the session from the registry
//!
//! Splitting them means a panic that escapes the read loop still frees
//! the user index and publishes the disconnect.

use std::sync::Arc;

use cinder_protocol::Packet;
use cinder_session::{ConnectionRegistry, Session};
use cinder_transport::Connection;

use crate::{DispatchOutcome, DispatchTable};

/// Starts the read loop for `session` plus the task that cleans up after it.
pub(crate) fn spawn_session(
    session: Arc<Session>,
    dispatch: Arc<DispatchTable>,
    registry: Arc<ConnectionRegistry>,
) {
    let task = tokio::spawn(read_loop(Arc::clone(&session), dispatch));

    tokio::spawn(async move {
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::error!(index = %session.index(), "session task panicked");
            }
        }
        registry.release(&session).await;
    });
}

async fn read_loop(session: Arc<Session>, dispatch: Arc<DispatchTable>) {
    let index = session.index();
    tracing::debug!(%index, addr = %session.addr(), "session read loop started");

    loop {
        let received = tokio::select! {
            biased;
            () = session.closed() => {
                tracing::debug!(%index, "session closed locally");
                break;
            }
            received = session.connection().recv() => received,
        };

        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!(%index, addr = %session.addr(), "client disconnected");
                break;
            }
            Err(e) => {
                tracing::warn!(%index, addr = %session.addr(), error = %e, "session read failed");
                break;
            }
        };

        let key = session.key().await;
        let packet = match Packet::decode(frame, &key) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(%index, error = %e, "malformed frame dropped");
                continue;
            }
        };

        if let DispatchOutcome::Panicked = dispatch.dispatch(&session, packet).await {
            break;
        }
    }

    session.close().await;
}
