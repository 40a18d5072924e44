//! Events published by the connection manager and the sink that receives them.
//!
//! 连接管理器发布的事件以及接收这些事件的接收器。

use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;

/// The state of the managed link.
/// 受管链路的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Nothing is installed.
    /// 未安装任何连接器或会话。
    #[default]
    Idle,
    /// A connector is attempting to reach the peer.
    /// 连接器正在尝试连接对端。
    Connecting,
    /// A link session owns an established handle.
    /// 链路会话持有已建立的句柄。
    Connected,
}

impl ConnectionState {
    /// Numeric code of the state, as exposed to status displays.
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// A recoverable fault reported through [`LinkEvent::TransientError`].
///
/// 通过 [`LinkEvent::TransientError`] 报告的可恢复故障。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkFault {
    /// The attempt could not establish a stream.
    /// 连接尝试无法建立流。
    ConnectFailed,
    /// An established stream failed or was closed by the peer.
    /// 已建立的流失败或被对端关闭。
    ConnectionLost,
    /// A single write failed. The session stays installed.
    /// 单次写入失败。会话仍然保留。
    WriteFailed,
}

impl LinkFault {
    /// The user-facing message for this fault.
    pub fn message(self) -> &'static str {
        match self {
            Self::ConnectFailed => "Unable to connect device",
            Self::ConnectionLost => "Device connection was lost",
            Self::WriteFailed => "Unable to write to device",
        }
    }
}

/// A notification delivered to an [`EventSink`].
///
/// 投递给 [`EventSink`] 的通知。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The manager's state was assigned. Sent on every assignment, even when
    /// the value did not change.
    /// 管理器的状态被赋值。每次赋值都会发送，即使值没有改变。
    StateChanged(ConnectionState),
    /// One read completed. `data` is an owned snapshot of exactly `len` bytes.
    /// 一次读取完成。`data` 是恰好 `len` 字节的独立快照。
    DataReceived { len: usize, data: Bytes },
    /// These bytes were written to the peer.
    /// 这些字节已写入对端。
    WriteEcho(Bytes),
    /// The name of the peer a session was just installed for.
    /// 刚刚安装会话的对端名称。
    PeerName(String),
    /// A recoverable condition worth showing to the user.
    /// 值得向用户展示的可恢复状况。
    TransientError { fault: LinkFault, message: String },
}

impl LinkEvent {
    pub(crate) fn fault(fault: LinkFault) -> Self {
        Self::TransientError {
            fault,
            message: fault.message().to_string(),
        }
    }
}

/// The observer capability the manager calls into.
///
/// Notifications are issued from the manager's own tasks and, for state
/// changes, while the manager's lock is held. Implementations must return
/// promptly and must not call back into the manager; a consumer bound to a
/// single thread marshals events onto it itself, e.g. through a channel.
///
/// 管理器调用的观察者能力。
///
/// 通知从管理器自己的任务中发出，状态变化的通知在持有管理器锁时发出。
/// 实现必须尽快返回，且不得回调管理器；绑定到单线程的消费者需要自行把事件
/// 转发到该线程，例如通过通道。
pub trait EventSink: Send + Sync + 'static {
    /// Delivers one event.
    /// 投递一个事件。
    fn notify(&self, event: LinkEvent);
}

impl EventSink for mpsc::UnboundedSender<LinkEvent> {
    fn notify(&self, event: LinkEvent) {
        // The receiver going away only means nobody is listening anymore.
        let _ = self.send(event);
    }
}

impl EventSink for mpsc::Sender<LinkEvent> {
    fn notify(&self, event: LinkEvent) {
        if let Err(e) = self.try_send(event) {
            warn!(error = %e, "event sink rejected event, dropping it");
        }
    }
}
