//! Full-lifecycle tests over real loopback UDP sockets.

use bytes::Bytes;
use merlin_protocol::client::{Client, ClientEvent};
use merlin_protocol::server::{Server, ServerEvent};
use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;
use tokio::time::timeout;

/// Helper to initialize tracing for tests.
fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with_test_writer()
            .init();
    });
}

async fn expect<T, F: std::future::Future<Output = Option<T>>>(what: &str, fut: F) -> T {
    match timeout(Duration::from_secs(5), fut).await {
        Ok(Some(value)) => value,
        Ok(None) => panic!("{}: event stream ended", what),
        Err(_) => panic!("{}: timed out", what),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_exchange_close() {
    init_tracing();

    let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (server, mut server_events) = Server::bind(bind_addr).await.unwrap();

    let (client, mut client_events) = Client::connect(server.local_addr()).await.unwrap();

    // Handshake completes on both sides.
    let peer = match expect("server handshake", server_events.next()).await {
        ServerEvent::PeerNew { peer } => peer,
        other => panic!("expected PeerNew, got {:?}", other),
    };
    // The client bound a wildcard address; only the port is comparable.
    assert_eq!(peer.port(), client.local_addr().port());

    match expect("client handshake", client_events.next()).await {
        ClientEvent::Connected => {}
        other => panic!("expected Connected, got {:?}", other),
    }

    // Client -> server, reliable.
    client
        .send(true, 7, Bytes::from_static(b"hello from client"))
        .await
        .unwrap();
    match expect("server receives", server_events.next()).await {
        ServerEvent::Packet {
            peer: from,
            sub_command,
            payload,
        } => {
            assert_eq!(from, peer);
            assert_eq!(sub_command, 7);
            assert_eq!(&payload[..], b"hello from client");
        }
        other => panic!("expected Packet, got {:?}", other),
    }

    // Server -> client, reliable.
    server
        .send(peer, true, 3, Bytes::from_static(b"hello from server"))
        .await
        .unwrap();
    match expect("client receives", client_events.next()).await {
        ClientEvent::Packet {
            sub_command,
            payload,
        } => {
            assert_eq!(sub_command, 3);
            assert_eq!(&payload[..], b"hello from server");
        }
        other => panic!("expected Packet, got {:?}", other),
    }

    // Explicit close: the server observes the drop, the client does not
    // report anything for its own close.
    client.close().await.unwrap();
    match expect("server observes close", server_events.next()).await {
        ServerEvent::PeerDropped { peer: dropped } => assert_eq!(dropped, peer),
        other => panic!("expected PeerDropped, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreliable_delivery_and_ordering() {
    init_tracing();

    let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (server, mut server_events) = Server::bind(bind_addr).await.unwrap();
    let (client, mut client_events) = Client::connect(server.local_addr()).await.unwrap();

    match expect("server handshake", server_events.next()).await {
        ServerEvent::PeerNew { .. } => {}
        other => panic!("expected PeerNew, got {:?}", other),
    }
    match expect("client handshake", client_events.next()).await {
        ClientEvent::Connected => {}
        other => panic!("expected Connected, got {:?}", other),
    }

    for index in 0u8..3 {
        client
            .send(false, 1, Bytes::from(vec![index]))
            .await
            .unwrap();
    }

    // Loopback does not reorder; all three arrive in order.
    let mut received = Vec::new();
    while received.len() < 3 {
        match expect("unreliable packet", server_events.next()).await {
            ServerEvent::Packet {
                sub_command,
                payload,
                ..
            } => {
                assert_eq!(sub_command, 1);
                received.push(payload[0]);
            }
            other => panic!("expected Packet, got {:?}", other),
        }
    }
    assert_eq!(received, vec![0, 1, 2]);

    let _ = client.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_send_before_connected_is_rejected() {
    init_tracing();

    // Nobody is listening on this socket, so the handshake never finishes.
    let dead_server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = dead_server.local_addr().unwrap();

    let (client, _events) = Client::connect(target).await.unwrap();
    let result = client.send(true, 0, Bytes::from_static(b"too early")).await;
    assert!(result.is_err(), "send before Connected must fail");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_broadcast_and_shutdown() {
    init_tracing();

    let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (server, mut server_events) = Server::bind(bind_addr).await.unwrap();

    let (_client_a, mut events_a) = Client::connect(server.local_addr()).await.unwrap();
    let (_client_b, mut events_b) = Client::connect(server.local_addr()).await.unwrap();

    for _ in 0..2 {
        match expect("server handshake", server_events.next()).await {
            ServerEvent::PeerNew { .. } => {}
            other => panic!("expected PeerNew, got {:?}", other),
        }
    }
    match expect("client a handshake", events_a.next()).await {
        ClientEvent::Connected => {}
        other => panic!("expected Connected, got {:?}", other),
    }
    match expect("client b handshake", events_b.next()).await {
        ClientEvent::Connected => {}
        other => panic!("expected Connected, got {:?}", other),
    }

    server
        .broadcast(true, 9, Bytes::from_static(b"to everyone"))
        .await
        .unwrap();

    for events in [&mut events_a, &mut events_b] {
        match expect("broadcast delivery", events.next()).await {
            ClientEvent::Packet {
                sub_command,
                payload,
            } => {
                assert_eq!(sub_command, 9);
                assert_eq!(&payload[..], b"to everyone");
            }
            other => panic!("expected Packet, got {:?}", other),
        }
    }

    // Shutdown closes every peer; both clients lose the server.
    server.shutdown().await.unwrap();
    match expect("client a lost server", events_a.next()).await {
        ClientEvent::ServerLost => {}
        other => panic!("expected ServerLost, got {:?}", other),
    }
    match expect("client b lost server", events_b.next()).await {
        ClientEvent::ServerLost => {}
        other => panic!("expected ServerLost, got {:?}", other),
    }
}
