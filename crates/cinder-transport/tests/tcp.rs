//! Integration tests for the framed TCP transport.
//!
//! These spin up a real listener on a random port and drive it with a
//! plain `TcpStream` client, so frame splitting is exercised against
//! whatever chunking the OS hands us.

use std::time::Duration;

use cinder_transport::{
    Connection, FRAME_MAGIC, TcpConnection, TcpTransport, Transport,
    TransportError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Builds a frame with the given body after the 4-byte prefix.
fn frame(body: &[u8]) -> Vec<u8> {
    let len = (4 + body.len()) as u16;
    let mut out = Vec::with_capacity(len as usize);
    out.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Binds on a random port and returns the transport with its address.
async fn bind() -> (TcpTransport, std::net::SocketAddr) {
    let transport = TcpTransport::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = transport.local_addr().expect("should have local addr");
    (transport, addr)
}

async fn accept_with_client(
) -> (TcpConnection, TcpStream) {
    let (mut transport, addr) = bind().await;
    let server = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });
    let client = TcpStream::connect(addr).await.expect("should connect");
    let conn = server.await.expect("task should complete");
    (conn, client)
}

#[tokio::test]
async fn test_bind_invalid_address_returns_bind_error() {
    let result = TcpTransport::bind("definitely-not-an-address").await;
    assert!(matches!(result, Err(TransportError::Bind { .. })));
}

#[tokio::test]
async fn test_recv_reassembles_frame_split_across_writes() {
    let (conn, mut client) = accept_with_client().await;

    let bytes = frame(b"hello");
    client.write_all(&bytes[..3]).await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write_all(&bytes[3..]).await.unwrap();

    let got = conn.recv().await.expect("recv ok").expect("a frame");
    assert_eq!(got.as_ref(), bytes.as_slice());
}

#[tokio::test]
async fn test_recv_splits_coalesced_frames_in_order() {
    let (conn, mut client) = accept_with_client().await;

    let mut both = frame(b"one");
    both.extend(frame(b"two!"));
    client.write_all(&both).await.unwrap();

    let first = conn.recv().await.unwrap().unwrap();
    let second = conn.recv().await.unwrap().unwrap();
    assert_eq!(&first[4..], b"one");
    assert_eq!(&second[4..], b"two!");
}

#[tokio::test]
async fn test_recv_clean_eof_returns_none() {
    let (conn, client) = accept_with_client().await;
    drop(client);

    let got = conn.recv().await.expect("clean close is not an error");
    assert!(got.is_none());
}

#[tokio::test]
async fn test_recv_eof_mid_frame_returns_error() {
    let (conn, mut client) = accept_with_client().await;
    let bytes = frame(b"truncated");
    client.write_all(&bytes[..6]).await.unwrap();
    drop(client);

    let result = conn.recv().await;
    assert!(matches!(result, Err(TransportError::ConnectionClosed(_))));
}

#[tokio::test]
async fn test_recv_bad_magic_returns_desync() {
    let (conn, mut client) = accept_with_client().await;
    client.write_all(&[0x00, 0x00, 0x08, 0x00, 1, 2, 3, 4]).await.unwrap();

    let result = conn.recv().await;
    assert!(matches!(result, Err(TransportError::Desync { .. })));
}

#[tokio::test]
async fn test_recv_oversized_frame_is_rejected() {
    let (mut transport, addr) = bind().await;
    transport = transport.with_max_frame_len(16);
    let server = tokio::spawn(async move { transport.accept().await.unwrap() });
    let mut client = TcpStream::connect(addr).await.unwrap();
    let conn = server.await.unwrap();

    client.write_all(&frame(&[0u8; 32])).await.unwrap();

    let result = conn.recv().await;
    assert!(matches!(
        result,
        Err(TransportError::FrameTooLarge { len: 36, max: 16 })
    ));
}

#[tokio::test]
async fn test_send_delivers_bytes_to_client() {
    let (conn, mut client) = accept_with_client().await;

    let bytes = frame(b"from server");
    conn.send(&bytes).await.expect("send should succeed");

    let mut buf = vec![0u8; bytes.len()];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, bytes);
}

#[tokio::test]
async fn test_close_twice_is_noop_and_blocks_send() {
    let (conn, _client) = accept_with_client().await;

    conn.close().await.expect("first close");
    conn.close().await.expect("second close is a no-op");
    assert!(conn.is_closed());

    let result = conn.send(&frame(b"late")).await;
    assert!(matches!(result, Err(TransportError::ConnectionClosed(_))));
}

#[tokio::test]
async fn test_connection_ids_are_unique_and_peer_is_recorded() {
    let (mut transport, addr) = bind().await;
    let server = tokio::spawn(async move {
        let a = transport.accept().await.unwrap();
        let b = transport.accept().await.unwrap();
        (a, b)
    });
    let c1 = TcpStream::connect(addr).await.unwrap();
    let c2 = TcpStream::connect(addr).await.unwrap();
    let (a, b) = server.await.unwrap();

    assert_ne!(a.id(), b.id());
    let peers = [c1.local_addr().unwrap(), c2.local_addr().unwrap()];
    assert!(peers.contains(&a.peer_addr()));
    assert!(peers.contains(&b.peer_addr()));
}

#[tokio::test]
async fn test_outbound_connect_round_trip() {
    let (mut transport, addr) = bind().await;
    let server = tokio::spawn(async move { transport.accept().await.unwrap() });

    let client = TcpConnection::connect(addr).await.expect("connect");
    let server_conn = server.await.unwrap();

    client.send(&frame(b"ping")).await.unwrap();
    let got = server_conn.recv().await.unwrap().unwrap();
    assert_eq!(&got[4..], b"ping");
}
