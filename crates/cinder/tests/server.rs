//! Integration tests for the Cinder server, session loop, and full
//! client handshake.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cinder::prelude::*;
use cinder::rpc::calls::{VerifySession, VerifySessionRequest, VerifySessionResponse};
use cinder::transport::{Connection, TcpConnection};

// =========================================================================
// Test protocol
// =========================================================================

const PING: Opcode = Opcode(0x0001);
const VERIFY: Opcode = Opcode(0x0066);
const PRIVILEGED: Opcode = Opcode(0x0070);
const STRICT: Opcode = Opcode(0x0071);
const EXPLODE: Opcode = Opcode(0x00EE);
const NOTICE: Opcode = Opcode(0x0078);

const GOOD_KEY: u32 = 0x00C0_FFEE;
const LOGIN_INDEX: UserIndex = UserIndex(9);
const ACCOUNT: AccountId = AccountId(77);

fn explode() -> Result<(), HandlerError> {
    panic!("handler bug")
}

/// Packet handlers shared by every test. `VERIFY` is only registered
/// when a login-role link is supplied.
fn table(login: Option<RpcClient>) -> DispatchTable {
    let mut table = DispatchTable::new();

    table
        .register(PING, "ping", |session, packet| async move {
            let n = packet.reader().read_u32()?;
            let mut reply = PacketWriter::new(PING);
            reply.write_u32(n).write_u16(session.index().0);
            session.send(&reply).await?;
            Ok(())
        })
        .unwrap();

    table
        .register(PRIVILEGED, "privileged", |session, _| async move {
            let account = session.require_verified()?;
            let mut reply = PacketWriter::new(PRIVILEGED);
            reply.write_i32(account.0);
            session.send(&reply).await?;
            Ok(())
        })
        .unwrap();

    table
        .register(STRICT, "strict", |session, packet| async move {
            let value = packet.reader().read_u64()?;
            let mut reply = PacketWriter::new(STRICT);
            reply.write_u64(value);
            session.send(&reply).await?;
            Ok(())
        })
        .unwrap();

    table
        .register(EXPLODE, "explode", |_, _| async move { explode() })
        .unwrap();

    table.register_inert(NOTICE, "notice").unwrap();

    if let Some(login) = login {
        table
            .register(VERIFY, "verify", move |session, packet| {
                let login = login.clone();
                async move {
                    let mut reader = packet.reader();
                    let auth_key = reader.read_u32()?;
                    let user_index = UserIndex(reader.read_u16()?);

                    let response = login
                        .call::<VerifySession>(&VerifySessionRequest {
                            auth_key,
                            user_index,
                            server_id: 1,
                            channel_id: 1,
                            ip: session.ip(),
                        })
                        .await?;

                    let mut reply = PacketWriter::new(VERIFY);
                    match (response.verified, response.account) {
                        (true, Some(account)) => {
                            session.mark_verified(account);
                            reply.write_u8(1).write_i32(account.0);
                        }
                        _ => {
                            reply.write_u8(0).write_i32(0);
                        }
                    }
                    session.send(&reply).await?;
                    Ok(())
                }
            })
            .unwrap();
    }

    table
}

/// Stands in for the login role: knows exactly one valid handover.
async fn login_role() -> RpcClient {
    let mut server = RpcServer::bind("127.0.0.1:0", RpcConfig::default())
        .await
        .unwrap();
    server
        .register::<VerifySession, _, _>(|_, req| async move {
            let valid = req.auth_key == GOOD_KEY && req.user_index == LOGIN_INDEX;
            Ok(VerifySessionResponse {
                verified: valid,
                account: valid.then_some(ACCOUNT),
            })
        })
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    RpcClient::connect(addr, RpcConfig::default()).await.unwrap()
}

async fn start(table: DispatchTable, config: ServerConfig) -> (SocketAddr, Arc<ConnectionRegistry>) {
    let server = CinderServer::builder()
        .config(config)
        .bind("127.0.0.1:0")
        .build(table)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let registry = server.registry();
    tokio::spawn(server.run());
    (addr, registry)
}

// =========================================================================
// Client helpers
// =========================================================================

struct Client {
    conn: TcpConnection,
    key: XorKey,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        Self::connect_with_key(addr, XorKey::none()).await
    }

    async fn connect_with_key(addr: SocketAddr, key: XorKey) -> Self {
        Self {
            conn: TcpConnection::connect(addr).await.unwrap(),
            key,
        }
    }

    async fn send(&self, packet: &PacketWriter) {
        let frame = packet.encode(&self.key).unwrap();
        self.conn.send(&frame).await.unwrap();
    }

    async fn recv(&self) -> Packet {
        let frame = tokio::time::timeout(Duration::from_secs(2), self.conn.recv())
            .await
            .expect("reply within timeout")
            .expect("recv ok")
            .expect("a frame, not EOF");
        Packet::decode(frame, &self.key).unwrap()
    }

    /// Round-trips a ping and returns the session index the server echoes.
    async fn ping(&self, n: u32) -> UserIndex {
        let mut packet = PacketWriter::new(PING);
        packet.write_u32(n);
        self.send(&packet).await;

        let reply = self.recv().await;
        assert_eq!(reply.opcode(), PING);
        let mut reader = reply.reader();
        assert_eq!(reader.read_u32().unwrap(), n);
        UserIndex(reader.read_u16().unwrap())
    }

    async fn expect_silence(&self) {
        let got = tokio::time::timeout(Duration::from_millis(150), self.conn.recv()).await;
        assert!(got.is_err(), "expected no frame");
    }

    async fn expect_closed(&self) {
        let got = tokio::time::timeout(Duration::from_secs(2), self.conn.recv())
            .await
            .expect("server closes the connection");
        assert!(matches!(got, Ok(None) | Err(_)), "expected EOF, got a frame");
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =========================================================================
// Builder
// =========================================================================

#[tokio::test]
async fn test_builder_duplicate_opcode_fails_before_accepting() {
    fn assemble() -> Result<DispatchTable, CinderError> {
        let mut table = DispatchTable::new();
        table.register(Opcode(0x1234), "first", |_, _| async { Ok(()) })?;
        table.register(Opcode(0x1234), "second", |_, _| async { Ok(()) })?;
        Ok(table)
    }

    let result = assemble();

    assert!(matches!(result, Err(CinderError::Dispatch(_))));
}

#[tokio::test]
async fn test_builder_bind_conflict_returns_transport_error() {
    let (addr, _registry) = start(table(None), ServerConfig::default()).await;

    let result = CinderServer::builder()
        .bind(&addr.to_string())
        .build(table(None))
        .await;

    assert!(matches!(result, Err(CinderError::Transport(_))));
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_full_handshake_unlocks_privileged_opcode() {
    let login = login_role().await;
    let (addr, registry) = start(table(Some(login)), ServerConfig::default()).await;
    let client = Client::connect(addr).await;

    // First connection on a fresh server gets index 0.
    assert_eq!(client.ping(1).await, UserIndex(0));
    let session = registry.lookup(UserIndex(0)).await.expect("registered");
    assert!(!session.is_verified());

    let mut verify = PacketWriter::new(VERIFY);
    verify.write_u32(GOOD_KEY).write_u16(LOGIN_INDEX.0);
    client.send(&verify).await;

    let reply = client.recv().await;
    let mut reader = reply.reader();
    assert_eq!(reader.read_u8().unwrap(), 1);
    assert_eq!(reader.read_i32().unwrap(), ACCOUNT.0);
    assert!(session.is_verified() && session.is_logged_in());
    assert_eq!(registry.is_online(ACCOUNT).await, UserIndex(0));

    client.send(&PacketWriter::new(PRIVILEGED)).await;
    let reply = client.recv().await;
    assert_eq!(reply.opcode(), PRIVILEGED);
    assert_eq!(reply.reader().read_i32().unwrap(), ACCOUNT.0);
}

#[tokio::test]
async fn test_handshake_with_wrong_key_leaves_session_unverified() {
    let login = login_role().await;
    let (addr, registry) = start(table(Some(login)), ServerConfig::default()).await;
    let client = Client::connect(addr).await;
    let index = client.ping(1).await;

    let mut verify = PacketWriter::new(VERIFY);
    verify.write_u32(GOOD_KEY ^ 1).write_u16(LOGIN_INDEX.0);
    client.send(&verify).await;

    assert_eq!(client.recv().await.reader().read_u8().unwrap(), 0);
    let session = registry.lookup(index).await.unwrap();
    assert!(!session.is_verified());
    assert_eq!(registry.is_online(ACCOUNT).await, UserIndex::INVALID);
}

#[tokio::test]
async fn test_privileged_opcode_before_verification_is_rejected() {
    let (addr, registry) = start(table(None), ServerConfig::default()).await;
    let client = Client::connect(addr).await;
    client.ping(1).await;

    client.send(&PacketWriter::new(PRIVILEGED)).await;

    client.expect_silence().await;
    // Rejected, not disconnected.
    client.ping(2).await;
    assert_eq!(registry.count().await, 1);
}

// =========================================================================
// Dispatch outcomes on a live session
// =========================================================================

#[tokio::test]
async fn test_unknown_opcode_is_dropped_and_session_stays_open() {
    let (addr, _registry) = start(table(None), ServerConfig::default()).await;
    let client = Client::connect(addr).await;

    let mut unknown = PacketWriter::new(Opcode(0x7777));
    unknown.write_u32(5);
    client.send(&unknown).await;

    client.expect_silence().await;
    client.ping(3).await;
}

#[tokio::test]
async fn test_inert_opcode_is_ignored() {
    let (addr, _registry) = start(table(None), ServerConfig::default()).await;
    let client = Client::connect(addr).await;

    client.send(&PacketWriter::new(NOTICE)).await;

    client.expect_silence().await;
    client.ping(4).await;
}

#[tokio::test]
async fn test_truncated_payload_fails_handler_but_keeps_session() {
    let (addr, _registry) = start(table(None), ServerConfig::default()).await;
    let client = Client::connect(addr).await;

    let mut short = PacketWriter::new(STRICT);
    short.write_u16(1);
    client.send(&short).await;
    client.expect_silence().await;

    let mut full = PacketWriter::new(STRICT);
    full.write_u64(0xABCD);
    client.send(&full).await;
    assert_eq!(client.recv().await.reader().read_u64().unwrap(), 0xABCD);
}

#[tokio::test]
async fn test_packets_from_one_session_are_handled_in_order() {
    let (addr, _registry) = start(table(None), ServerConfig::default()).await;
    let client = Client::connect(addr).await;

    for n in 0..20u32 {
        let mut packet = PacketWriter::new(PING);
        packet.write_u32(n);
        client.send(&packet).await;
    }
    for n in 0..20u32 {
        assert_eq!(client.recv().await.reader().read_u32().unwrap(), n);
    }
}

#[tokio::test]
async fn test_handler_panic_closes_only_that_session() {
    let (addr, registry) = start(table(None), ServerConfig::default()).await;
    let victim = Client::connect(addr).await;
    let bystander = Client::connect(addr).await;
    let victim_index = victim.ping(1).await;
    bystander.ping(1).await;

    victim.send(&PacketWriter::new(EXPLODE)).await;

    victim.expect_closed().await;
    eventually(|| async { registry.lookup(victim_index).await.is_none() }).await;
    bystander.ping(2).await;
    assert_eq!(registry.count().await, 1);
}

#[tokio::test]
async fn test_bad_magic_desyncs_and_closes_session() {
    let (addr, registry) = start(table(None), ServerConfig::default()).await;
    let client = Client::connect(addr).await;
    client.ping(1).await;

    client.conn.send(&[0x00, 0x00, 0x06, 0x00, 0x01, 0x00]).await.unwrap();

    client.expect_closed().await;
    eventually(|| async { registry.count().await == 0 }).await;
}

#[tokio::test]
async fn test_obfuscated_session_round_trips_with_configured_key() {
    let key = XorKey::new(vec![0x5A, 0xA5, 0x3C]);
    let config = ServerConfig {
        xor_key: vec![0x5A, 0xA5, 0x3C],
        ..ServerConfig::default()
    };
    let (addr, _registry) = start(table(None), config).await;
    let client = Client::connect_with_key(addr, key).await;

    assert_eq!(client.ping(0x0102_0304).await, UserIndex(0));
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_close_user_twice_releases_slot_once() {
    let (addr, registry) = start(table(None), ServerConfig::default()).await;
    let disconnects = Arc::new(AtomicUsize::new(0));
    {
        let disconnects = Arc::clone(&disconnects);
        registry
            .subscribe(move |event| {
                if let RegistryEvent::Disconnected(_) = event {
                    disconnects.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
    }
    let client = Client::connect(addr).await;
    let other = Client::connect(addr).await;
    let index = client.ping(1).await;
    other.ping(1).await;

    assert!(registry.close_user(index).await);
    registry.close_user(index).await;

    client.expect_closed().await;
    eventually(|| async { disconnects.load(Ordering::SeqCst) == 1 }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    other.ping(2).await;
}

#[tokio::test]
async fn test_client_disconnect_frees_index_for_reuse() {
    let config = ServerConfig {
        registry: RegistryConfig { capacity: 1 },
        ..ServerConfig::default()
    };
    let (addr, registry) = start(table(None), config).await;

    let first = Client::connect(addr).await;
    assert_eq!(first.ping(1).await, UserIndex(0));
    first.conn.close().await.unwrap();
    drop(first);
    eventually(|| async { registry.count().await == 0 }).await;

    let second = Client::connect(addr).await;
    assert_eq!(second.ping(1).await, UserIndex(0));
}

#[tokio::test]
async fn test_full_server_refuses_connection_and_keeps_others() {
    let config = ServerConfig {
        registry: RegistryConfig { capacity: 1 },
        ..ServerConfig::default()
    };
    let (addr, registry) = start(table(None), config).await;
    let first = Client::connect(addr).await;
    first.ping(1).await;

    let refused = Client::connect(addr).await;

    refused.expect_closed().await;
    first.ping(2).await;
    assert_eq!(registry.count().await, 1);
}

#[tokio::test]
async fn test_broadcast_reaches_every_connected_client() {
    let (addr, registry) = start(table(None), ServerConfig::default()).await;
    let a = Client::connect(addr).await;
    let b = Client::connect(addr).await;
    a.ping(1).await;
    b.ping(1).await;

    let mut notice = PacketWriter::new(NOTICE);
    notice.write_str_u8("maintenance in 5 minutes").unwrap();
    assert_eq!(registry.broadcast(&notice, None).await, 2);

    for client in [&a, &b] {
        let packet = client.recv().await;
        assert_eq!(packet.opcode(), NOTICE);
        assert_eq!(packet.reader().read_str_u8().unwrap(), "maintenance in 5 minutes");
    }
}
