//! TCP-based transport, for serial-over-TCP bridges and loopback testing.
//!
//! 基于TCP的传输，用于串口转TCP桥接和回环测试。

use super::{CloseSignal, Connection, LinkHandle, PeerAddress, Transport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
};
use tracing::debug;

/// Connects to peers given as `ip:port` socket addresses.
///
/// 连接以 `ip:port` 套接字地址给出的对端。
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    nodelay: bool,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `TCP_NODELAY` on every established stream.
    ///
    /// 在每个已建立的流上设置 `TCP_NODELAY`。
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, address: &PeerAddress) -> Result<Connection> {
        let remote: SocketAddr = address.as_str().parse()?;
        let stream = TcpStream::connect(remote).await?;
        stream.set_nodelay(self.nodelay)?;
        let peer_name = stream.peer_addr()?.to_string();
        debug!(peer = %peer_name, "TCP stream established");
        Ok(Connection::new(Arc::new(TcpHandle::new(stream)), peer_name))
    }
}

/// A [`LinkHandle`] over a TCP stream.
///
/// The halves are locked independently, so a read blocked on the socket never
/// holds up a write.
///
/// 基于TCP流的 [`LinkHandle`]。两个半部分各自加锁，阻塞在套接字上的读取不会拖住写入。
#[derive(Debug)]
pub struct TcpHandle {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: CloseSignal,
}

impl TcpHandle {
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CloseSignal::new(),
        }
    }
}

#[async_trait]
impl LinkHandle for TcpHandle {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.closed.is_closed() {
            return Err(Error::HandleClosed);
        }
        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.closed() => Err(Error::HandleClosed),
            read = reader.read(buf) => Ok(read?),
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<()> {
        if self.closed.is_closed() {
            return Err(Error::HandleClosed);
        }
        let mut writer = self.writer.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.closed() => Err(Error::HandleClosed),
            written = async {
                writer.write_all(buf).await?;
                writer.flush().await
            } => Ok(written?),
        }
    }

    fn close(&self) {
        if self.closed.close() {
            debug!("TCP link handle closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::{net::TcpListener, time::timeout};

    async fn loopback_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address: PeerAddress = listener.local_addr().unwrap().to_string().parse().unwrap();
        let transport = TcpTransport::new().with_nodelay(true);
        let (connection, accepted) = tokio::join!(transport.connect(&address), listener.accept());
        (connection.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let (connection, mut remote) = loopback_pair().await;
        assert_eq!(
            connection.peer_name,
            remote.local_addr().unwrap().to_string()
        );

        connection.handle.write(b"12.5,3.1,0.7\n").await.unwrap();
        let mut received = [0u8; 13];
        remote.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"12.5,3.1,0.7\n");

        remote.write_all(b"ok").await.unwrap();
        let mut buf = [0u8; 16];
        let n = connection.handle.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ok");
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let (connection, _remote) = loopback_pair().await;
        let handle = connection.handle.clone();
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            handle.read(&mut buf).await
        });

        tokio::task::yield_now().await;
        connection.handle.close();

        let result = timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
        assert!(matches!(result, Err(Error::HandleClosed)));
        assert!(matches!(
            connection.handle.write(b"late").await,
            Err(Error::HandleClosed)
        ));
    }

    #[tokio::test]
    async fn test_invalid_socket_address() {
        let transport = TcpTransport::new();
        let address: PeerAddress = "98:D3:31:FB:2A:11".parse().unwrap();
        assert!(matches!(
            transport.connect(&address).await,
            Err(Error::AddressParse(_))
        ));
    }
}
