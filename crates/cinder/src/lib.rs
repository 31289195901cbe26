//! # Cinder
//!
//! Server core for MMO emulators split into login, game and master roles.
//!
//! Cinder owns the parts every role shares: the framed client protocol,
//! the registry of live sessions, the opcode dispatch table, and the RPC
//! link between roles. A role only supplies its packet handlers and its
//! RPC handlers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cinder::prelude::*;
//!
//! # async fn start() -> Result<(), CinderError> {
//! let mut table = DispatchTable::new();
//! table.register(Opcode(0x0065), "hello", |session, _packet| async move {
//!     let mut reply = PacketWriter::new(Opcode(0x0065));
//!     reply.write_u32(session.auth_key());
//!     session.send(&reply).await?;
//!     Ok(())
//! })?;
//!
//! let server = CinderServer::builder()
//!     .bind("0.0.0.0:38101")
//!     .build(table)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod dispatch;
mod error;
mod handler;
pub mod logging;
mod server;

pub use config::ServerConfig;
pub use dispatch::{DispatchOutcome, DispatchTable};
pub use error::{CinderError, DispatchError, HandlerError};
pub use server::{CinderServer, CinderServerBuilder};

pub use cinder_protocol as protocol;
pub use cinder_rpc as rpc;
pub use cinder_session as session;
pub use cinder_transport as transport;

/// Everything a server role usually needs in one import.
pub mod prelude {
    pub use crate::{
        CinderError, CinderServer, DispatchOutcome, DispatchTable, HandlerError, ServerConfig,
    };
    pub use cinder_protocol::{
        AccountId, Opcode, Packet, PacketReader, PacketWriter, UserIndex, XorKey,
    };
    pub use cinder_rpc::{CallError, RpcCall, RpcClient, RpcConfig, RpcError, RpcServer};
    pub use cinder_session::{ConnectionRegistry, RegistryConfig, RegistryEvent, Session};
}
