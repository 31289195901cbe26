//! The calls every login/game deployment needs.
//!
//! | Call                  | Served by  | Used by                          |
//! |-----------------------|------------|----------------------------------|
//! | `register_server`     | master     | login and game servers at start  |
//! | `server_list`         | master     | login server, to draw the list   |
//! | `update_load`         | master     | game servers, as players come/go |
//! | `verify_session`      | login      | game server, on client handover  |
//! | `load_characters`     | data store | login/game server after verify   |
//! | `load_character_data` | data store | game server when a char enters   |
//!
//! Record contents past identity and routing fields are opaque to the
//! core; character data in particular is carried as raw blobs.

use std::net::{IpAddr, Ipv4Addr};

use cinder_protocol::{AccountId, UserIndex};
use serde::{Deserialize, Serialize};

use crate::RpcCall;

// ---------------------------------------------------------------------------
// Directory calls
// ---------------------------------------------------------------------------

/// What role a registering server plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    Login,
    Game,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterServerRequest {
    pub kind: ServerKind,
    /// Channel flavour shown in the client's list (normal, PvP, ...).
    /// Opaque to the directory.
    pub server_type: u8,
    pub server_id: u8,
    /// Ignored for login servers.
    pub channel_id: u8,
    /// Public address clients are sent to.
    pub ip: Ipv4Addr,
    pub port: u16,
    pub max_users: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterServerResponse {
    pub registered: bool,
}

/// A server role announces itself to the master.
pub struct RegisterServer;

impl RpcCall for RegisterServer {
    const NAME: &'static str = "register_server";
    type Request = RegisterServerRequest;
    type Response = RegisterServerResponse;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerListRequest;

/// One channel of a game server, as shown in the client's server list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub channel_id: u8,
    pub server_type: u8,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub current_users: u16,
    pub max_users: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub server_id: u8,
    pub channels: Vec<ChannelEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerListResponse {
    /// Sorted by `server_id`, channels by `channel_id`.
    pub servers: Vec<ServerEntry>,
}

/// Lists registered game servers and their current load.
pub struct ServerList;

impl RpcCall for ServerList {
    const NAME: &'static str = "server_list";
    type Request = ServerListRequest;
    type Response = ServerListResponse;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLoadRequest {
    pub server_id: u8,
    pub channel_id: u8,
    pub current_users: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLoadResponse {
    /// `false` if the caller never registered this channel.
    pub accepted: bool,
}

/// A game server reports how many players a channel holds.
pub struct UpdateLoad;

impl RpcCall for UpdateLoad {
    const NAME: &'static str = "update_load";
    type Request = UpdateLoadRequest;
    type Response = UpdateLoadResponse;
}

// ---------------------------------------------------------------------------
// Session handover
// ---------------------------------------------------------------------------

/// Sent by a game server when a client arrives from the login server
/// and presents the key it was issued there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySessionRequest {
    pub auth_key: u32,
    /// The client's index on the login server.
    pub user_index: UserIndex,
    pub server_id: u8,
    pub channel_id: u8,
    /// Address the client connected to the game server from.
    pub ip: IpAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySessionResponse {
    pub verified: bool,
    /// Set when `verified` is true.
    pub account: Option<AccountId>,
}

/// Confirms a client's session token against the authenticating role.
pub struct VerifySession;

impl RpcCall for VerifySession {
    const NAME: &'static str = "verify_session";
    type Request = VerifySessionRequest;
    type Response = VerifySessionResponse;
}

// ---------------------------------------------------------------------------
// Character data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadCharactersRequest {
    pub account: AccountId,
    pub server_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSummary {
    pub id: i32,
    pub name: String,
    pub level: u16,
    /// Class, appearance and position, packed the way the client expects.
    pub appearance: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadCharactersResponse {
    pub characters: Vec<CharacterSummary>,
}

/// Lists the characters an account owns on one server.
pub struct LoadCharacters;

impl RpcCall for LoadCharacters {
    const NAME: &'static str = "load_characters";
    type Request = LoadCharactersRequest;
    type Response = LoadCharactersResponse;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadCharacterDataRequest {
    pub server_id: u8,
    pub character_id: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadCharacterDataResponse {
    pub equipment: Vec<u8>,
    pub inventory: Vec<u8>,
    pub skills: Vec<u8>,
    pub quick_slots: Vec<u8>,
}

/// Loads the full record for one character.
pub struct LoadCharacterData;

impl RpcCall for LoadCharacterData {
    const NAME: &'static str = "load_character_data";
    type Request = LoadCharacterDataRequest;
    type Response = LoadCharacterDataResponse;
}
