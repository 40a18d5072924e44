//! An established link: the read loop and the write path over one handle.
//!
//! 已建立的链路：单个句柄上的读取循环和写入路径。

use super::Shared;
use crate::{
    config::SessionConfig,
    error::{Error, Result},
    event::{EventSink, LinkEvent, LinkFault},
    transport::{CloseSignal, LinkHandle},
};
use bytes::Bytes;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

/// Exclusive owner of one live handle.
///
/// Every event the session publishes is emitted while holding `live` for
/// reading, and a write holds it for the whole handle write. Cancellation
/// clears `live` under the exclusive lock and only then closes the handle, so
/// a write is never issued to a closed handle and the session is silent once
/// `cancel` returns.
///
/// 单个存活句柄的独占所有者。会话发布的每个事件都在持有 `live` 读锁时发出，写入在整个句柄写操作期间
/// 持有该读锁。取消操作在写锁下清除 `live` 后才关闭句柄，因此不会向已关闭的句柄发出写入，
/// 且 `cancel` 返回后会话不再发出任何事件。
pub(super) struct LinkSession {
    id: u64,
    handle: Arc<dyn LinkHandle>,
    sink: Arc<dyn EventSink>,
    config: SessionConfig,
    live: RwLock<bool>,
    cancelled: CloseSignal,
}

impl LinkSession {
    pub(super) fn new(
        id: u64,
        handle: Arc<dyn LinkHandle>,
        sink: Arc<dyn EventSink>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            handle,
            sink,
            config,
            live: RwLock::new(true),
            cancelled: CloseSignal::new(),
        })
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    /// Spawns the read loop. When it ends the loss is reported to the manager
    /// behind `shared`, exactly once.
    pub(super) fn start(self: &Arc<Self>, shared: Weak<Shared>) {
        let session = self.clone();
        tokio::spawn(async move {
            let error = session.read_loop().await;
            match shared.upgrade() {
                Some(shared) => shared.session_lost(session.id, error).await,
                None => session.close(),
            }
        });
    }

    /// Reads until the stream fails, ends or is closed, and returns why.
    async fn read_loop(&self) -> Error {
        debug!(id = self.id, "read loop started");
        let mut buf = vec![0u8; self.config.read_buffer_size];
        loop {
            match self.handle.read(&mut buf).await {
                Ok(0) => return Error::ConnectionClosed,
                Ok(len) => {
                    let live = self.live.read().await;
                    if !*live {
                        return Error::HandleClosed;
                    }
                    trace!(id = self.id, len, "data received");
                    self.sink.notify(LinkEvent::DataReceived {
                        len,
                        data: Bytes::copy_from_slice(&buf[..len]),
                    });
                }
                Err(error) => return error,
            }
        }
    }

    /// Writes to the handle and echoes the bytes on success.
    ///
    /// The gate is held across the handle write, so the handle cannot be closed
    /// by `cancel` underneath it. A pending cancellation aborts the write
    /// instead. A failure is reported as a transient fault; tearing the session
    /// down is left to the read loop.
    pub(super) async fn write(&self, data: Bytes) -> Result<()> {
        let live = self.live.read().await;
        if !*live {
            return Err(Error::HandleClosed);
        }

        let result = tokio::select! {
            biased;
            _ = self.cancelled.closed() => Err(Error::HandleClosed),
            result = self.handle.write(&data) => result,
        };

        match result {
            Ok(()) => {
                if self.config.echo_writes {
                    self.sink.notify(LinkEvent::WriteEcho(data));
                }
                Ok(())
            }
            Err(error) => {
                if self.cancelled.is_closed() {
                    trace!(id = self.id, "write aborted by cancellation");
                } else {
                    warn!(id = self.id, %error, "write failed");
                    self.sink.notify(LinkEvent::fault(LinkFault::WriteFailed));
                }
                Err(error)
            }
        }
    }

    /// Silences the session and closes its handle. In-flight writes are
    /// aborted and waited for, as is an event that is being published.
    pub(super) async fn cancel(&self) {
        self.cancelled.close();
        let mut live = self.live.write().await;
        if std::mem::replace(&mut *live, false) {
            debug!(id = self.id, "link session cancelled");
        }
        self.handle.close();
    }

    /// Closes the handle without waiting.
    pub(super) fn close(&self) {
        self.cancelled.close();
        self.handle.close();
    }
}
