//! End-to-end lifecycle of a managed link over loopback TCP.

pub mod common;

use common::harness::{TestHarness, spawn_echo_device, unused_addr};
use bytes::Bytes;
use serial_link::{ConnectionState, LinkEvent, LinkFault, PeerAddress, TcpTransport};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::time::timeout;

fn peer(addr: std::net::SocketAddr) -> PeerAddress {
    addr.to_string().parse().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_connection_lifecycle() {
    let (device_addr, mut device_closed) = spawn_echo_device(b"12.0,11.5,0.5\n").await;
    let mut h = TestHarness::new(TcpTransport::new().with_nodelay(true));

    // 1. Connect.
    h.manager.connect(peer(device_addr)).await;
    assert_eq!(
        h.events.next().await,
        LinkEvent::StateChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        h.events.next().await,
        LinkEvent::PeerName(device_addr.to_string())
    );
    assert_eq!(
        h.events.next().await,
        LinkEvent::StateChanged(ConnectionState::Connected)
    );
    assert_eq!(h.manager.state().await, ConnectionState::Connected);

    // 2. The greeting arrives as raw bytes.
    let greeting = h.events.read_until(b"\n").await;
    assert_eq!(greeting, b"12.0,11.5,0.5\n");

    // 3. A write is echoed locally and then by the device.
    h.manager.write(&b"PING\n"[..]).await;
    let echoed = h.events.read_until(b"PING\n").await;
    assert_eq!(echoed, b"PING\n");

    // 4. Stop closes the stream; the device observes end-of-stream. The local
    // echo is published before the session goes quiet.
    h.manager.stop().await;
    h.events.wait_for_state(ConnectionState::Idle).await;
    assert_eq!(h.events.echoes, vec![Bytes::from_static(b"PING\n")]);
    timeout(Duration::from_secs(5), device_closed.recv())
        .await
        .expect("device should see the link close");
    assert!(h.events.drain().await.is_empty());
}

#[tokio::test]
async fn test_device_hangup_is_connection_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let device_addr = listener.local_addr().unwrap();
    let mut h = TestHarness::new(TcpTransport::new());

    h.manager.connect(peer(device_addr)).await;
    let (mut stream, _) = listener.accept().await.unwrap();
    h.events.wait_for_state(ConnectionState::Connected).await;

    stream.write_all(b"1,2,3\n").await.unwrap();
    h.events.read_until(b"\n").await;
    drop(stream);

    assert_eq!(
        h.events.next().await,
        LinkEvent::StateChanged(ConnectionState::Idle)
    );
    assert_eq!(
        h.events.next().await,
        LinkEvent::TransientError {
            fault: LinkFault::ConnectionLost,
            message: "Device connection was lost".to_string(),
        }
    );
    assert!(h.events.drain().await.is_empty());

    // The manager is re-enterable after a loss.
    h.manager.connect(peer(device_addr)).await;
    let (_stream, _) = listener.accept().await.unwrap();
    h.events.wait_for_state(ConnectionState::Connected).await;
}

#[tokio::test]
async fn test_refused_connection_is_connect_failed() {
    let mut h = TestHarness::new(TcpTransport::new());
    h.manager.connect(peer(unused_addr().await)).await;

    assert_eq!(
        h.events.next().await,
        LinkEvent::StateChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        h.events.next().await,
        LinkEvent::StateChanged(ConnectionState::Idle)
    );
    assert_eq!(
        h.events.next().await,
        LinkEvent::TransientError {
            fault: LinkFault::ConnectFailed,
            message: "Unable to connect device".to_string(),
        }
    );
    assert_eq!(h.manager.state().await, ConnectionState::Idle);
}

#[tokio::test]
async fn test_unparseable_address_is_connect_failed() {
    let mut h = TestHarness::new(TcpTransport::new());
    h.manager.connect("98:D3:31:FB:2A:11".parse().unwrap()).await;
    h.events.wait_for_state(ConnectionState::Idle).await;
    assert!(matches!(
        h.events.next().await,
        LinkEvent::TransientError {
            fault: LinkFault::ConnectFailed,
            ..
        }
    ));
}
