//! tests/common/harness.rs
use bytes::Bytes;
use serial_link::{ConnectionManager, ConnectionState, LinkEvent, Transport};
use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing_subscriber::fmt::format::FmtSpan;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "serial_link=debug".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::FULL)
            .with_test_writer()
            .init();
    });
}

/// Collects the events a manager publishes.
pub struct EventLog {
    rx: mpsc::UnboundedReceiver<LinkEvent>,
    /// Write echoes skipped over by `read_until` and `wait_for_state`.
    pub echoes: Vec<Bytes>,
}

impl EventLog {
    /// Waits for the next event.
    pub async fn next(&mut self) -> LinkEvent {
        timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Skips events until `state` is assigned.
    pub async fn wait_for_state(&mut self, state: ConnectionState) {
        loop {
            match self.next().await {
                LinkEvent::StateChanged(s) if s == state => return,
                LinkEvent::WriteEcho(data) => self.echoes.push(data),
                _ => {}
            }
        }
    }

    /// Accumulates inbound data until it contains `needle`.
    pub async fn read_until(&mut self, needle: &[u8]) -> Vec<u8> {
        let mut collected = Vec::new();
        while !collected.windows(needle.len()).any(|w| w == needle) {
            match self.next().await {
                LinkEvent::DataReceived { len, data } => {
                    assert_eq!(len, data.len());
                    collected.extend_from_slice(&data);
                }
                LinkEvent::WriteEcho(data) => self.echoes.push(data),
                other => panic!("unexpected event while reading: {other:?}"),
            }
        }
        collected
    }

    /// Returns whatever arrives within a short quiet period.
    pub async fn drain(&mut self) -> Vec<LinkEvent> {
        sleep(Duration::from_millis(100)).await;
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A manager wired to an event log.
pub struct TestHarness {
    pub manager: ConnectionManager,
    pub events: EventLog,
}

impl TestHarness {
    pub fn new(transport: impl Transport) -> Self {
        init_tracing();
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            manager: ConnectionManager::new(transport, tx),
            events: EventLog {
                rx,
                echoes: Vec::new(),
            },
        }
    }
}

/// Spawns a TCP stand-in for a sensor: it greets with one reading line and then
/// echoes everything it receives until the client goes away. Returns the
/// device address and a receiver that yields once the device saw end-of-stream.
pub async fn spawn_echo_device(greeting: &'static [u8]) -> (SocketAddr, mpsc::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(greeting).await.unwrap();
        let mut buf = [0u8; 256];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("[Device {}] client went away", addr);
        let _ = closed_tx.send(()).await;
    });

    (addr, closed_rx)
}

/// Returns a loopback address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
