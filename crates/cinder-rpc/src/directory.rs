//! The master role's view of which servers are up.
//!
//! Entries are keyed by the RPC peer that registered them, so when a
//! server's link closes everything it announced disappears with it. A
//! server that reconnects re-registers from its `on_connect` hook.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::calls::{
    ChannelEntry, RegisterServer, RegisterServerRequest, RegisterServerResponse, ServerEntry,
    ServerKind, ServerList, ServerListResponse, UpdateLoad, UpdateLoadRequest, UpdateLoadResponse,
};
use crate::{PeerId, PeerInfo, RpcError, RpcServer};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Registration {
    kind: ServerKind,
    server_type: u8,
    server_id: u8,
    channel_id: u8,
    ip: Ipv4Addr,
    port: u16,
    max_users: u16,
    current_users: u16,
}

/// Registered login and game servers.
#[derive(Debug, Default)]
pub struct ServerDirectory {
    entries: RwLock<HashMap<PeerId, Vec<Registration>>>,
}

impl ServerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a server announced by `peer`.
    ///
    /// Returns `false` if another live peer already holds the same game
    /// `(server_id, channel_id)`. Re-registering from the same peer
    /// replaces its earlier entry.
    pub async fn register(&self, peer: &PeerInfo, req: RegisterServerRequest) -> bool {
        let mut entries = self.entries.write().await;

        if req.kind == ServerKind::Game {
            let taken_elsewhere = entries.iter().any(|(id, regs)| {
                *id != peer.id
                    && regs.iter().any(|r| {
                        r.kind == ServerKind::Game
                            && r.server_id == req.server_id
                            && r.channel_id == req.channel_id
                    })
            });
            if taken_elsewhere {
                tracing::warn!(
                    peer = %peer.id,
                    server_id = req.server_id,
                    channel_id = req.channel_id,
                    "game channel already registered by another peer"
                );
                return false;
            }
        }

        let regs = entries.entry(peer.id).or_default();
        regs.retain(|r| {
            !(r.kind == req.kind && r.server_id == req.server_id && r.channel_id == req.channel_id)
        });
        regs.push(Registration {
            kind: req.kind,
            server_type: req.server_type,
            server_id: req.server_id,
            channel_id: req.channel_id,
            ip: req.ip,
            port: req.port,
            max_users: req.max_users,
            current_users: 0,
        });

        tracing::info!(
            peer = %peer.id,
            addr = %peer.addr,
            kind = ?req.kind,
            server_id = req.server_id,
            channel_id = req.channel_id,
            "server registered"
        );
        true
    }

    /// Updates the player count of a channel `peer` registered.
    pub async fn update_load(&self, peer: &PeerInfo, req: UpdateLoadRequest) -> bool {
        let mut entries = self.entries.write().await;
        let Some(reg) = entries.get_mut(&peer.id).and_then(|regs| {
            regs.iter_mut().find(|r| {
                r.kind == ServerKind::Game
                    && r.server_id == req.server_id
                    && r.channel_id == req.channel_id
            })
        }) else {
            return false;
        };
        reg.current_users = req.current_users;
        true
    }

    /// Game servers grouped by server id, channels in id order.
    pub async fn list(&self) -> Vec<ServerEntry> {
        let entries = self.entries.read().await;
        let mut grouped: BTreeMap<u8, Vec<ChannelEntry>> = BTreeMap::new();

        for reg in entries.values().flatten() {
            if reg.kind != ServerKind::Game {
                continue;
            }
            grouped.entry(reg.server_id).or_default().push(ChannelEntry {
                channel_id: reg.channel_id,
                server_type: reg.server_type,
                ip: reg.ip,
                port: reg.port,
                current_users: reg.current_users,
                max_users: reg.max_users,
            });
        }

        grouped
            .into_iter()
            .map(|(server_id, mut channels)| {
                channels.sort_by_key(|c| c.channel_id);
                ServerEntry {
                    server_id,
                    channels,
                }
            })
            .collect()
    }

    /// Forgets everything `peer` registered. Returns how many entries
    /// were dropped.
    pub async fn drop_peer(&self, peer: PeerId) -> usize {
        let dropped = self
            .entries
            .write()
            .await
            .remove(&peer)
            .map_or(0, |regs| regs.len());
        if dropped > 0 {
            tracing::info!(%peer, dropped, "server unregistered");
        }
        dropped
    }

    /// Serves `register_server`, `server_list` and `update_load` from
    /// this directory on `server`, and drops a peer's entries when its
    /// link closes.
    ///
    /// # Errors
    /// [`RpcError::DuplicateCall`] if any of the three calls is already
    /// registered on `server`.
    pub fn install(self: &Arc<Self>, server: &mut RpcServer) -> Result<(), RpcError> {
        let dir = Arc::clone(self);
        server.register::<RegisterServer, _, _>(move |peer, req| {
            let dir = Arc::clone(&dir);
            async move {
                Ok(RegisterServerResponse {
                    registered: dir.register(&peer, req).await,
                })
            }
        })?;

        let dir = Arc::clone(self);
        server.register::<ServerList, _, _>(move |_, _| {
            let dir = Arc::clone(&dir);
            async move {
                Ok(ServerListResponse {
                    servers: dir.list().await,
                })
            }
        })?;

        let dir = Arc::clone(self);
        server.register::<UpdateLoad, _, _>(move |peer, req| {
            let dir = Arc::clone(&dir);
            async move {
                Ok(UpdateLoadResponse {
                    accepted: dir.update_load(&peer, req).await,
                })
            }
        })?;

        let dir = Arc::clone(self);
        server.on_disconnect(move |peer| {
            let dir = Arc::clone(&dir);
            async move {
                dir.drop_peer(peer.id).await;
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, SocketAddr};

    use super::*;

    fn peer(id: u64) -> PeerInfo {
        PeerInfo {
            id: PeerId::new(id),
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000 + id as u16),
        }
    }

    fn game(server_id: u8, channel_id: u8) -> RegisterServerRequest {
        RegisterServerRequest {
            kind: ServerKind::Game,
            server_type: 0,
            server_id,
            channel_id,
            ip: Ipv4Addr::new(127, 0, 0, 1),
            port: 38120 + u16::from(channel_id),
            max_users: 100,
        }
    }

    #[tokio::test]
    async fn test_list_groups_channels_by_server_in_order() {
        let dir = ServerDirectory::new();
        assert!(dir.register(&peer(1), game(2, 1)).await);
        assert!(dir.register(&peer(2), game(1, 2)).await);
        assert!(dir.register(&peer(3), game(1, 1)).await);

        let list = dir.list().await;

        assert_eq!(list.len(), 2);
        assert_eq!(list[0].server_id, 1);
        let ids: Vec<u8> = list[0].channels.iter().map(|c| c.channel_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(list[1].server_id, 2);
    }

    #[tokio::test]
    async fn test_list_carries_server_type_through() {
        let dir = ServerDirectory::new();
        let mut pvp = game(1, 2);
        pvp.server_type = 3;
        assert!(dir.register(&peer(1), game(1, 1)).await);
        assert!(dir.register(&peer(2), pvp).await);

        let types: Vec<u8> = dir.list().await[0]
            .channels
            .iter()
            .map(|c| c.server_type)
            .collect();

        assert_eq!(types, vec![0, 3]);
    }

    #[tokio::test]
    async fn test_list_excludes_login_servers() {
        let dir = ServerDirectory::new();
        let mut login = game(0, 0);
        login.kind = ServerKind::Login;
        assert!(dir.register(&peer(1), login).await);

        assert!(dir.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_same_channel_from_other_peer_rejected() {
        let dir = ServerDirectory::new();
        assert!(dir.register(&peer(1), game(1, 1)).await);
        assert!(!dir.register(&peer(2), game(1, 1)).await);
        // Same peer announcing again just refreshes its entry.
        assert!(dir.register(&peer(1), game(1, 1)).await);
        assert_eq!(dir.list().await[0].channels.len(), 1);
    }

    #[tokio::test]
    async fn test_update_load_only_for_own_channel() {
        let dir = ServerDirectory::new();
        dir.register(&peer(1), game(1, 1)).await;
        let load = UpdateLoadRequest {
            server_id: 1,
            channel_id: 1,
            current_users: 42,
        };

        assert!(!dir.update_load(&peer(2), load).await);
        assert!(dir.update_load(&peer(1), load).await);
        assert_eq!(dir.list().await[0].channels[0].current_users, 42);
    }

    #[tokio::test]
    async fn test_drop_peer_removes_its_entries_only() {
        let dir = ServerDirectory::new();
        dir.register(&peer(1), game(1, 1)).await;
        dir.register(&peer(1), game(1, 2)).await;
        dir.register(&peer(2), game(1, 3)).await;

        assert_eq!(dir.drop_peer(PeerId::new(1)).await, 2);
        assert_eq!(dir.drop_peer(PeerId::new(1)).await, 0);

        let list = dir.list().await;
        assert_eq!(list[0].channels.len(), 1);
        assert_eq!(list[0].channels[0].channel_id, 3);
    }
}
