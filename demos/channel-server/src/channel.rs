//! The game channel role.
//!
//! A client arrives here after logging in, presents the auth key and
//! index it was given by the login role, and is verified through the
//! master before it may touch its characters.

use std::net::Ipv4Addr;
use std::sync::Arc;

use cinder::prelude::*;
use cinder::rpc::calls::{
    LoadCharacterData, LoadCharacterDataRequest, LoadCharacters, LoadCharactersRequest,
    RegisterServer, RegisterServerRequest, ServerKind, UpdateLoad, UpdateLoadRequest,
    VerifySession, VerifySessionRequest,
};
use tokio::sync::{Notify, RwLock};

use crate::master::owner_of;
use crate::opcodes::{CHARACTERS, ENTER_WORLD, HANDOVER, NOTICE, WHO_AM_I, count_u8, status};

/// Where this channel sits in the server list.
#[derive(Debug, Clone, Copy)]
pub struct Placement {
    pub server_type: u8,
    pub server_id: u8,
    pub channel_id: u8,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub max_users: u16,
}

/// Per-session state once a character has entered the world.
#[derive(Debug)]
pub struct InWorld {
    pub character_id: i32,
    pub inventory: RwLock<Vec<u8>>,
}

pub fn table(
    registry: Arc<ConnectionRegistry>,
    master: RpcClient,
    placement: Placement,
) -> Result<DispatchTable, CinderError> {
    let mut table = DispatchTable::new();

    let link = master.clone();
    table.register(HANDOVER, "handover", move |session, packet| {
        let master = link.clone();
        async move {
            let mut reader = packet.reader();
            let auth_key = reader.read_u32()?;
            let user_index = UserIndex(reader.read_u16()?);

            let answer = master
                .call::<VerifySession>(&VerifySessionRequest {
                    auth_key,
                    user_index,
                    server_id: placement.server_id,
                    channel_id: placement.channel_id,
                    ip: session.ip(),
                })
                .await?;

            let mut reply = PacketWriter::new(HANDOVER);
            match answer.account.filter(|_| answer.verified) {
                Some(account) => {
                    session.mark_verified(account);
                    reply.write_u8(status::OK).write_i32(account.0);
                }
                None => {
                    reply.write_u8(status::REFUSED);
                }
            }
            session.send(&reply).await?;
            Ok(())
        }
    })?;

    let link = master.clone();
    table.register(CHARACTERS, "characters", move |session, _| {
        let master = link.clone();
        async move {
            let account = session.require_verified()?;
            let roster = master
                .call::<LoadCharacters>(&LoadCharactersRequest {
                    account,
                    server_id: placement.server_id,
                })
                .await?;

            let mut reply = PacketWriter::new(CHARACTERS);
            reply.write_u8(count_u8(roster.characters.len(), "characters")?);
            for character in &roster.characters {
                reply
                    .write_i32(character.id)
                    .write_u16(character.level)
                    .write_str_u8(&character.name)?;
            }
            session.send(&reply).await?;
            Ok(())
        }
    })?;

    table.register(ENTER_WORLD, "enter_world", move |session, packet| {
        let master = master.clone();
        let registry = Arc::clone(&registry);
        async move {
            let account = session.require_verified()?;
            let character_id = packet.reader().read_i32()?;
            if owner_of(character_id) != account {
                return Err(HandlerError::unauthorized(
                    session.index(),
                    format!("character {character_id} belongs to another account"),
                ));
            }

            let data = master
                .call::<LoadCharacterData>(&LoadCharacterDataRequest {
                    server_id: placement.server_id,
                    character_id,
                })
                .await?;
            session
                .set_extension(InWorld {
                    character_id,
                    inventory: RwLock::new(data.inventory),
                })
                .await;

            let mut reply = PacketWriter::new(ENTER_WORLD);
            reply.write_u8(status::OK).write_i32(character_id);
            session.send(&reply).await?;

            let mut notice = PacketWriter::new(NOTICE);
            notice.write_i32(character_id);
            registry.broadcast(&notice, Some(session.index())).await;
            Ok(())
        }
    })?;

    table.register(WHO_AM_I, "who_am_i", |session, _| async move {
        let in_world = session.extension::<InWorld>().await?;
        let mut reply = PacketWriter::new(WHO_AM_I);
        reply
            .write_i32(in_world.character_id)
            .write_u16(in_world.inventory.read().await.len() as u16);
        session.send(&reply).await?;
        Ok(())
    })?;

    table.register_inert(NOTICE, "notice")?;

    Ok(table)
}

/// Registers this channel with the master every time the link comes up.
pub async fn announce(master: &RpcClient, placement: Placement) {
    master
        .on_connect(move |client: RpcClient| async move {
            let request = RegisterServerRequest {
                kind: ServerKind::Game,
                server_type: placement.server_type,
                server_id: placement.server_id,
                channel_id: placement.channel_id,
                ip: placement.ip,
                port: placement.port,
                max_users: placement.max_users,
            };
            match client.call::<RegisterServer>(&request).await {
                Ok(response) if response.registered => {
                    tracing::info!(
                        server_id = placement.server_id,
                        channel_id = placement.channel_id,
                        "channel registered with master"
                    );
                }
                Ok(_) => tracing::error!(
                    server_id = placement.server_id,
                    channel_id = placement.channel_id,
                    "master refused channel registration"
                ),
                Err(e) => tracing::warn!(error = %e, "channel registration failed"),
            }
        })
        .await;
}

/// Reports the session count to the master whenever it changes.
pub async fn report_load(registry: Arc<ConnectionRegistry>, master: RpcClient, placement: Placement) {
    let changed = Arc::new(Notify::new());
    let signal = Arc::clone(&changed);
    registry.subscribe(move |_| signal.notify_one()).await;

    tokio::spawn(async move {
        loop {
            changed.notified().await;
            let current_users = registry.count().await.min(usize::from(u16::MAX)) as u16;
            let request = UpdateLoadRequest {
                server_id: placement.server_id,
                channel_id: placement.channel_id,
                current_users,
            };
            if let Err(e) = master.call::<UpdateLoad>(&request).await {
                tracing::debug!(error = %e, current_users, "load report dropped");
            }
        }
    });
}
