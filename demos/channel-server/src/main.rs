//! Runs a master, a login role and one game channel in a single process.
//!
//! ```text
//! cargo run -p channel-server [config.json]
//! ```
//!
//! A client connects to the login role, says hello, logs in, picks the
//! channel from the server list, then reconnects to the channel and
//! hands over with the auth key and index the login role gave it.

mod channel;
mod login;
mod master;
mod opcodes;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use cinder::prelude::*;
use serde::Deserialize;

use crate::channel::Placement;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct DemoConfig {
    master_addr: String,
    login: ServerConfig,
    channel: ServerConfig,
    server_type: u8,
    server_id: u8,
    channel_id: u8,
    rpc: RpcConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            master_addr: "127.0.0.1:38180".to_string(),
            login: ServerConfig::default(),
            channel: ServerConfig {
                bind_addr: "127.0.0.1:38111".to_string(),
                ..ServerConfig::default()
            },
            server_type: 0,
            server_id: 1,
            channel_id: 1,
            rpc: RpcConfig::default(),
        }
    }
}

fn load_config() -> Result<DemoConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        None => Ok(DemoConfig::default()),
    }
}

fn shared_registry(config: &ServerConfig) -> Arc<ConnectionRegistry> {
    Arc::new(ConnectionRegistry::new(
        config.registry.clone(),
        config.xor_key(),
    ))
}

/// Client-facing addresses of the running roles.
struct Running {
    login: SocketAddr,
    channel: SocketAddr,
}

async fn launch(config: DemoConfig) -> Result<Running, Box<dyn std::error::Error>> {
    let login_registry = shared_registry(&config.login);
    let (master_server, _directory) =
        master::build(&config.master_addr, Arc::clone(&login_registry)).await?;
    let master_addr = master_server.local_addr()?;
    tokio::spawn(master_server.run());

    let login_link = RpcClient::connect(master_addr, config.rpc.clone()).await?;
    let login_server = CinderServer::builder()
        .config(config.login.clone())
        .registry(Arc::clone(&login_registry))
        .build(login::table(login_registry, login_link)?)
        .await?;
    let login = login_server.local_addr()?;

    let channel_registry = shared_registry(&config.channel);
    let channel_link = RpcClient::connect(master_addr, config.rpc.clone()).await?;
    let mut placement = Placement {
        server_type: config.server_type,
        server_id: config.server_id,
        channel_id: config.channel_id,
        ip: Ipv4Addr::LOCALHOST,
        port: 0,
        max_users: config.channel.registry.capacity,
    };
    let channel_server = CinderServer::builder()
        .config(config.channel.clone())
        .registry(Arc::clone(&channel_registry))
        .build(channel::table(
            Arc::clone(&channel_registry),
            channel_link.clone(),
            placement,
        )?)
        .await?;
    let channel = channel_server.local_addr()?;
    if let IpAddr::V4(ip) = channel.ip() {
        placement.ip = ip;
    }
    placement.port = channel.port();

    channel::announce(&channel_link, placement).await;
    channel::report_load(channel_registry, channel_link, placement).await;

    tokio::spawn(async move {
        if let Err(e) = login_server.run().await {
            tracing::error!(error = %e, "login role stopped");
        }
    });
    tokio::spawn(async move {
        if let Err(e) = channel_server.run().await {
            tracing::error!(error = %e, "channel role stopped");
        }
    });

    Ok(Running { login, channel })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    cinder::logging::init("info");

    let config = load_config()?;
    let running = launch(config).await?;
    tracing::info!(login = %running.login, channel = %running.channel, "demo roles up");

    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::*;
    use cinder::transport::{Connection, TcpConnection};
    use std::time::Duration;

    async fn start() -> Running {
        let config = DemoConfig {
            master_addr: "127.0.0.1:0".to_string(),
            login: ServerConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                ..ServerConfig::default()
            },
            channel: ServerConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                ..ServerConfig::default()
            },
            ..DemoConfig::default()
        };
        launch(config).await.unwrap()
    }

    struct Client(TcpConnection);

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            Self(TcpConnection::connect(addr).await.unwrap())
        }

        async fn request(&self, packet: &PacketWriter) -> Packet {
            self.send(packet).await;
            self.recv().await
        }

        async fn send(&self, packet: &PacketWriter) {
            let frame = packet.encode(&XorKey::none()).unwrap();
            self.0.send(&frame).await.unwrap();
        }

        async fn recv(&self) -> Packet {
            let frame = tokio::time::timeout(Duration::from_secs(2), self.0.recv())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            Packet::decode(frame, &XorKey::none()).unwrap()
        }

        async fn expect_silence(&self) {
            let got = tokio::time::timeout(Duration::from_millis(150), self.0.recv()).await;
            assert!(got.is_err());
        }
    }

    /// Logs in as `account` and returns the client plus its handover
    /// credentials.
    async fn logged_in(running: &Running, account: i32) -> (Client, u32, u16) {
        let client = Client::connect(running.login).await;
        let hello = client.request(&PacketWriter::new(HELLO)).await;
        let mut reader = hello.reader();
        let auth_key = reader.read_u32().unwrap();
        let index = reader.read_u16().unwrap();

        let mut login = PacketWriter::new(LOGIN);
        login.write_i32(account);
        let reply = client.request(&login).await;
        assert_eq!(reply.reader().read_u8().unwrap(), status::OK);

        (client, auth_key, index)
    }

    async fn handover(running: &Running, auth_key: u32, index: u16) -> (Client, Packet) {
        let client = Client::connect(running.channel).await;
        let mut packet = PacketWriter::new(HANDOVER);
        packet.write_u32(auth_key).write_u16(index);
        let reply = client.request(&packet).await;
        (client, reply)
    }

    #[tokio::test]
    async fn test_full_flow_enters_world() {
        let running = start().await;
        let (login, auth_key, index) = logged_in(&running, 5).await;

        // The channel registers with the master asynchronously.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let list = login.request(&PacketWriter::new(SERVER_LIST)).await;
            if list.reader().read_u8().unwrap() == 1 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "channel never listed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let (channel, reply) = handover(&running, auth_key, index).await;
        let mut reader = reply.reader();
        assert_eq!(reader.read_u8().unwrap(), status::OK);
        assert_eq!(reader.read_i32().unwrap(), 5);

        let roster = channel.request(&PacketWriter::new(CHARACTERS)).await;
        let mut reader = roster.reader();
        assert_eq!(reader.read_u8().unwrap(), 2);
        let first = reader.read_i32().unwrap();

        let mut enter = PacketWriter::new(ENTER_WORLD);
        enter.write_i32(first);
        let entered = channel.request(&enter).await;
        assert_eq!(entered.reader().read_u8().unwrap(), status::OK);

        let who = channel.request(&PacketWriter::new(WHO_AM_I)).await;
        let mut reader = who.reader();
        assert_eq!(reader.read_i32().unwrap(), first);
        assert_eq!(reader.read_u16().unwrap(), 16);
    }

    #[tokio::test]
    async fn test_handover_with_wrong_key_is_refused() {
        let running = start().await;
        let (_login, auth_key, index) = logged_in(&running, 6).await;

        let (channel, reply) = handover(&running, auth_key.wrapping_add(1), index).await;
        assert_eq!(reply.reader().read_u8().unwrap(), status::REFUSED);

        channel.send(&PacketWriter::new(CHARACTERS)).await;
        channel.expect_silence().await;
    }

    #[tokio::test]
    async fn test_enter_foreign_character_is_ignored() {
        let running = start().await;
        let (_login, auth_key, index) = logged_in(&running, 7).await;
        let (channel, _) = handover(&running, auth_key, index).await;

        let mut enter = PacketWriter::new(ENTER_WORLD);
        enter.write_i32(8 << 3);
        channel.send(&enter).await;
        channel.expect_silence().await;

        channel.send(&PacketWriter::new(WHO_AM_I)).await;
        channel.expect_silence().await;
    }

    #[tokio::test]
    async fn test_second_login_for_same_account_is_refused() {
        let running = start().await;
        let (_first, _, _) = logged_in(&running, 9).await;

        let second = Client::connect(running.login).await;
        let mut login = PacketWriter::new(LOGIN);
        login.write_i32(9);
        let reply = second.request(&login).await;
        assert_eq!(reply.reader().read_u8().unwrap(), status::ALREADY_ONLINE);
    }
}
