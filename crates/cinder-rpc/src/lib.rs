//! Request/response calls between Cinder server roles.
//!
//! A login server, the game servers and the master directory run as
//! separate processes. They talk over persistent TCP links where each
//! call is a named request with a typed record in and a typed record out:
//!
//! ```text
//!  game server                               master
//!  ───────────                               ──────
//!  RpcClient::call::<ServerList>(&req) ────→ RpcServer handler for "server_list"
//!        ↑                                          │
//!        └──────── Result<ServerListResponse> ←─────┘
//! ```
//!
//! A call is never a local, infallible function: it can fail because the
//! link is down, because it timed out, because the other side doesn't
//! serve that name, or because the handler itself failed. All of these
//! come back to the caller as an [`RpcError`] and never to anyone else.

mod call;
pub mod calls;
mod client;
mod config;
mod directory;
mod error;
mod server;
mod wire;

pub use call::RpcCall;
pub use client::RpcClient;
pub use config::RpcConfig;
pub use directory::ServerDirectory;
pub use error::{CallError, RpcError};
pub use server::{PeerId, PeerInfo, RpcServer};
pub use wire::{Outcome, RpcFrame};
