//! In-process transport with manually resolved connection attempts.
//!
//! A [`MemoryListener`] stands in for a remote device: attempts against its
//! address stay pending until the listener accepts or refuses them, which
//! models a connect call that blocks for as long as the radio takes. Counters
//! in [`MemoryStats`] expose how many attempts and handles are alive.
//!
//! 进程内传输，连接尝试需要手动完成。
//!
//! [`MemoryListener`] 代表远端设备：针对其地址的连接尝试会一直挂起，直到监听器接受或
//! 拒绝，以此模拟无线连接调用的阻塞。[`MemoryStats`] 中的计数器显示存活的尝试和句柄数量。

use super::{CloseSignal, Connection, LinkHandle, PeerAddress, Transport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, trace};

/// Counters shared by a transport and every attempt and handle it creates.
///
/// 由传输及其创建的每个尝试和句柄共享的计数器。
#[derive(Debug, Default)]
pub struct MemoryStats {
    live_attempts: AtomicUsize,
    live_handles: AtomicUsize,
    write_calls: AtomicUsize,
    writes_after_close: AtomicUsize,
}

impl MemoryStats {
    /// Connection attempts whose future has not yet completed or been dropped.
    pub fn live_attempts(&self) -> usize {
        self.live_attempts.load(Ordering::SeqCst)
    }

    /// Handles that have been created and not yet dropped.
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }

    /// Every call to [`LinkHandle::write`] on any handle.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Calls to [`LinkHandle::write`] made on a handle that was already closed.
    pub fn writes_after_close(&self) -> usize {
        self.writes_after_close.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct PendingAttempt {
    reply: oneshot::Sender<Result<Connection>>,
}

/// Decrements the live attempt counter however the attempt ends.
struct AttemptGuard(Arc<MemoryStats>);

impl AttemptGuard {
    fn new(stats: Arc<MemoryStats>) -> Self {
        stats.live_attempts.fetch_add(1, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.0.live_attempts.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An in-process [`Transport`].
///
/// 进程内的 [`Transport`]。
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    routes: Arc<StdMutex<HashMap<PeerAddress, mpsc::UnboundedSender<PendingAttempt>>>>,
    stats: Arc<MemoryStats>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<MemoryStats> {
        self.stats.clone()
    }

    /// Makes `address` reachable. Replaces any earlier listener on it.
    ///
    /// 使 `address` 可达。替换该地址上之前的监听器。
    pub fn listen(&self, address: &PeerAddress, peer_name: impl Into<String>) -> MemoryListener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.clone(), tx);
        MemoryListener {
            address: address.clone(),
            peer_name: peer_name.into(),
            attempts: rx,
            stats: self.stats.clone(),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, address: &PeerAddress) -> Result<Connection> {
        let _guard = AttemptGuard::new(self.stats.clone());
        let route = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned();
        let route = route.ok_or_else(|| Error::ConnectionRefused(address.to_string()))?;

        let (reply, response) = oneshot::channel();
        route
            .send(PendingAttempt { reply })
            .map_err(|_| Error::ConnectionRefused(address.to_string()))?;
        trace!(%address, "memory connect attempt parked");

        // A listener dropped without answering refuses the attempt.
        response
            .await
            .map_err(|_| Error::ConnectionRefused(address.to_string()))?
    }
}

/// The remote device side of a [`MemoryTransport`] address.
///
/// [`MemoryTransport`] 地址的远端设备一侧。
#[derive(Debug)]
pub struct MemoryListener {
    address: PeerAddress,
    peer_name: String,
    attempts: mpsc::UnboundedReceiver<PendingAttempt>,
    stats: Arc<MemoryStats>,
}

impl MemoryListener {
    /// Completes the next attempt successfully and returns the remote end.
    /// Attempts abandoned by their caller are skipped; one abandoned while
    /// being accepted yields [`Error::ConnectionAborted`].
    ///
    /// 成功完成下一个连接尝试并返回远端。已被调用方放弃的尝试会被跳过。
    pub async fn accept(&mut self) -> Result<MemoryPeer> {
        let attempt = self.next_attempt().await?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = MemoryHandle::new(inbound_rx, outbound_tx, self.stats.clone());
        let connection = Connection::new(Arc::new(handle), self.peer_name.clone());

        attempt
            .reply
            .send(Ok(connection))
            .map_err(|_| Error::ConnectionAborted)?;
        debug!(address = %self.address, "memory connect attempt accepted");

        Ok(MemoryPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        })
    }

    /// Fails the next attempt.
    ///
    /// 使下一个连接尝试失败。
    pub async fn refuse(&mut self) -> Result<()> {
        let attempt = self.next_attempt().await?;
        attempt
            .reply
            .send(Err(Error::ConnectionRefused(self.address.to_string())))
            .map_err(|_| Error::ConnectionAborted)
    }

    /// Waits for the next attempt whose caller is still waiting for an answer.
    async fn next_attempt(&mut self) -> Result<PendingAttempt> {
        loop {
            let attempt = self.attempts.recv().await.ok_or(Error::ChannelClosed)?;
            if attempt.reply.is_closed() {
                trace!(address = %self.address, "skipping abandoned connect attempt");
                continue;
            }
            return Ok(attempt);
        }
    }
}

#[derive(Debug)]
enum Inbound {
    Data(Bytes),
    Fail,
}

/// The remote end of an accepted in-memory link.
///
/// 已接受的内存链路的远端。
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryPeer {
    /// Sends bytes to the local handle. Fails once the local handle is gone.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        self.inbound
            .send(Inbound::Data(data.into()))
            .map_err(|_| Error::ChannelClosed)
    }

    /// Makes the local handle's next read fail with an I/O error.
    pub fn fail(&self) -> Result<()> {
        self.inbound
            .send(Inbound::Fail)
            .map_err(|_| Error::ChannelClosed)
    }

    /// Receives the next chunk the local side wrote. `None` once the local
    /// handle has been closed or dropped.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }
}

#[derive(Debug)]
struct ReadState {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    pending: Bytes,
}

/// The local end of an in-memory link.
#[derive(Debug)]
struct MemoryHandle {
    reader: Mutex<ReadState>,
    writer: StdMutex<Option<mpsc::UnboundedSender<Bytes>>>,
    closed: CloseSignal,
    stats: Arc<MemoryStats>,
}

impl MemoryHandle {
    fn new(
        inbound: mpsc::UnboundedReceiver<Inbound>,
        outbound: mpsc::UnboundedSender<Bytes>,
        stats: Arc<MemoryStats>,
    ) -> Self {
        stats.live_handles.fetch_add(1, Ordering::SeqCst);
        Self {
            reader: Mutex::new(ReadState {
                inbound,
                pending: Bytes::new(),
            }),
            writer: StdMutex::new(Some(outbound)),
            closed: CloseSignal::new(),
            stats,
        }
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        self.stats.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LinkHandle for MemoryHandle {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.closed.is_closed() {
            return Err(Error::HandleClosed);
        }
        let mut state = self.reader.lock().await;
        if state.pending.is_empty() {
            let next = tokio::select! {
                biased;
                _ = self.closed.closed() => return Err(Error::HandleClosed),
                next = state.inbound.recv() => next,
            };
            match next {
                Some(Inbound::Data(data)) => state.pending = data,
                Some(Inbound::Fail) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "injected read failure",
                    )
                    .into());
                }
                // Peer dropped: end of stream.
                None => return Ok(0),
            }
        }
        let n = state.pending.len().min(buf.len());
        let chunk = state.pending.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }

    async fn write(&self, buf: &[u8]) -> Result<()> {
        self.stats.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.is_closed() {
            self.stats.writes_after_close.fetch_add(1, Ordering::SeqCst);
            return Err(Error::HandleClosed);
        }
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match writer {
            Some(writer) => writer
                .send(Bytes::copy_from_slice(buf))
                .map_err(|_| Error::ConnectionClosed),
            None => Err(Error::HandleClosed),
        }
    }

    fn close(&self) {
        if self.closed.close() {
            // Let the peer observe the close as end of its receive stream.
            self.writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            trace!("memory link handle closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}
