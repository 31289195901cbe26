//! Wire protocol for Cinder.
//!
//! This crate defines the "language" that game clients and server roles
//! speak:
//!
//! - **Frames** ([`PacketWriter`], [`Packet`], [`PacketReader`]) — the
//!   fixed-header binary format clients use. Every field is written and
//!   read explicitly; the codec never infers where one field ends.
//! - **Obfuscation** ([`XorKey`]) — the per-session payload scrambling
//!   the legacy client expects.
//! - **Identity types** ([`UserIndex`], [`AccountId`], [`Opcode`]).
//! - **Record codecs** ([`Codec`] trait, [`JsonCodec`]) — how structured
//!   records are turned into bytes for the inter-role RPC link.
//!
//! # Architecture
//!
//! ```text
//! Transport (frames) → Protocol (Packet + reader) → Dispatch (handler)
//! ```
//!
//! The protocol layer has no notion of sessions or connections: keys are
//! passed in by whoever owns them.

mod codec;
mod error;
mod packet;
mod types;
mod xor;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use packet::{HEADER_LEN, Packet, PacketReader, PacketWriter};
pub use types::{AccountId, Opcode, UserIndex};
pub use xor::XorKey;
