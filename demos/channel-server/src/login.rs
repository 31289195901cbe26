//! The login role: hands out session identities, accepts logins, and
//! lists the game channels the master knows about.

use std::sync::Arc;

use cinder::prelude::*;
use cinder::rpc::calls::{ServerList, ServerListRequest};

use crate::opcodes::{HELLO, LOGIN, SERVER_LIST, count_u8, status};

pub fn table(
    registry: Arc<ConnectionRegistry>,
    master: RpcClient,
) -> Result<DispatchTable, CinderError> {
    let mut table = DispatchTable::new();

    table.register(HELLO, "hello", |session, _| async move {
        let mut reply = PacketWriter::new(HELLO);
        reply.write_u32(session.auth_key()).write_u16(session.index().0);
        session.send(&reply).await?;
        Ok(())
    })?;

    // No credential store: the account id is taken at face value.
    table.register(LOGIN, "login", move |session, packet| {
        let registry = Arc::clone(&registry);
        async move {
            let account = AccountId(packet.reader().read_i32()?);
            if account.0 <= 0 {
                return Err(HandlerError::rejected(format!("bad account {account}")));
            }

            let mut reply = PacketWriter::new(LOGIN);
            if registry.is_online(account).await.is_valid() {
                reply.write_u8(status::ALREADY_ONLINE);
            } else {
                session.mark_verified(account);
                reply.write_u8(status::OK).write_i32(account.0);
            }
            session.send(&reply).await?;
            Ok(())
        }
    })?;

    table.register(SERVER_LIST, "server_list", move |session, _| {
        let master = master.clone();
        async move {
            session.require_verified()?;
            let list = master.call::<ServerList>(&ServerListRequest).await?;

            let mut reply = PacketWriter::new(SERVER_LIST);
            reply.write_u8(count_u8(list.servers.len(), "servers")?);
            for server in &list.servers {
                reply
                    .write_u8(server.server_id)
                    .write_u8(count_u8(server.channels.len(), "channels")?);
                for channel in &server.channels {
                    reply
                        .write_u8(channel.channel_id)
                        .write_u8(channel.server_type)
                        .write_bytes(&channel.ip.octets())
                        .write_u16(channel.port)
                        .write_u16(channel.current_users)
                        .write_u16(channel.max_users);
                }
            }
            session.send(&reply).await?;
            Ok(())
        }
    })?;

    Ok(table)
}
