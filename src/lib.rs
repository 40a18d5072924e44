#![deny(clippy::expect_used, clippy::unwrap_used)]

//! The root of the serial link connection library.
//! 串行链路连接库的根。
//!
//! A [`ConnectionManager`] connects to one peer at a time over a byte-stream
//! [`Transport`], streams everything it reads to an [`EventSink`], and lets the
//! caller write back while connected.
//!
//! ```no_run
//! use serial_link::{ConnectionManager, LinkEvent, TcpTransport};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> serial_link::Result<()> {
//! let (events_tx, mut events) = mpsc::unbounded_channel::<LinkEvent>();
//! let manager = ConnectionManager::new(TcpTransport::new(), events_tx);
//!
//! manager.connect("127.0.0.1:7000".parse()?).await;
//! while let Some(event) = events.recv().await {
//!     if let LinkEvent::DataReceived { data, .. } = event {
//!         println!("{}", String::from_utf8_lossy(&data));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod manager;
pub mod transport;

pub use config::{Config, SessionConfig};
pub use error::{Error, Result};
pub use event::{ConnectionState, EventSink, LinkEvent, LinkFault};
pub use manager::ConnectionManager;
pub use transport::{
    Connection, LinkHandle, MemoryTransport, PeerAddress, TcpTransport, Transport,
};
