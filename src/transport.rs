//! Transport layer abstraction for the serial link.
//!
//! This module describes what the connection manager needs from the platform:
//! something that turns an opaque address into an open byte-stream handle, and
//! the handle itself. Discovery and pairing happen before an address reaches
//! this layer.
//!
//! 串行链路的传输层抽象。
//!
//! 此模块描述连接管理器对平台的需求：将不透明地址转换为已打开字节流句柄的组件，
//! 以及句柄本身。发现和配对在地址到达此层之前完成。

pub mod memory;
pub mod tcp;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::{fmt, str::FromStr, sync::Arc};
use tokio::sync::watch;

pub use memory::{MemoryListener, MemoryPeer, MemoryStats, MemoryTransport};
pub use tcp::{TcpHandle, TcpTransport};

/// An opaque, connectable peer address as handed over by the platform.
///
/// 平台交给我们的不透明、可连接的对端地址。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidAddress(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An established stream together with the identity of the peer behind it.
///
/// Handing a connection to the manager transfers the handle to the session it
/// installs. From then on only that session reads, writes or closes it.
///
/// 已建立的流及其对端身份。将连接交给管理器即把句柄转交给其安装的会话，此后只有该会话读写或关闭它。
#[derive(Debug)]
pub struct Connection {
    /// The open handle.
    /// 已打开的句柄。
    pub handle: Arc<dyn LinkHandle>,
    /// Human readable peer name.
    /// 可读的对端名称。
    pub peer_name: String,
}

impl Connection {
    pub fn new(handle: Arc<dyn LinkHandle>, peer_name: impl Into<String>) -> Self {
        Self {
            handle,
            peer_name: peer_name.into(),
        }
    }
}

/// An open bidirectional byte-stream endpoint to a connected peer.
///
/// Every method takes `&self` so that a pending read never serializes a write.
/// `close` is the only way to interrupt a pending operation: once it has been
/// called, pending and future reads and writes resolve with
/// [`Error::HandleClosed`].
///
/// 与已连接对端的双向字节流端点。
///
/// 所有方法都接受 `&self`，因此挂起的读取不会阻塞写入。`close` 是中断挂起操作的
/// 唯一方式：调用之后，挂起和之后的读写都会以 [`Error::HandleClosed`] 结束。
#[async_trait]
pub trait LinkHandle: Send + Sync + fmt::Debug + 'static {
    /// Reads into `buf`, returning the number of bytes read. `Ok(0)` means the
    /// peer closed the stream.
    ///
    /// 读取到 `buf` 中，返回读取的字节数。`Ok(0)` 表示对端关闭了流。
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Writes all of `buf` to the peer.
    ///
    /// 将 `buf` 全部写入对端。
    async fn write(&self, buf: &[u8]) -> Result<()>;

    /// Closes the handle. Idempotent and non-blocking.
    ///
    /// 关闭句柄。幂等且不阻塞。
    fn close(&self);

    /// Returns whether `close` has been called.
    ///
    /// 返回是否已调用 `close`。
    fn is_closed(&self) -> bool;
}

/// Establishes stream connections to peer addresses.
///
/// The returned future may stay pending for as long as the platform keeps the
/// attempt open. Dropping it abandons the attempt and releases anything it
/// opened.
///
/// 与对端地址建立流连接。
///
/// 返回的future可能在平台保持尝试期间一直挂起。丢弃它会放弃尝试并释放已打开的资源。
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug + 'static {
    /// Connects to `address`.
    ///
    /// 连接到 `address`。
    async fn connect(&self, address: &PeerAddress) -> Result<Connection>;
}

/// A one-way close flag shared by a handle and the operations pending on it.
///
/// 由句柄及其挂起操作共享的单向关闭标志。
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Raises the flag. Returns `true` only for the call that raised it.
    ///
    /// 设置标志。仅对实际设置标志的那次调用返回 `true`。
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is raised.
    ///
    /// 标志被设置后完成。
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // `wait_for` checks the current value first, so a close that already
        // happened resolves immediately. The sender lives in `self`, so the
        // channel cannot be dropped while we wait.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
