//! 连接管理器 - 串行链路的公共状态机
//! Connection manager - the public state machine of the serial link
//!
//! The manager owns at most one [`Connector`] and at most one [`LinkSession`]
//! and moves between [`ConnectionState`]s under a single lock:
//!
//! ```text
//! Idle --connect--> Connecting --success--> Connected
//!  ^                  |  ^                    |
//!  |   failure / stop |  |  connect           | stop / lost
//!  +------------------+  +--------------------+----> Idle
//! ```
//!
//! Anything the manager cancels itself is superseded: its late completion is
//! discarded without reporting a fault.
//!
//! 管理器最多持有一个连接器和一个链路会话，并在同一把锁下切换状态。
//! 被管理器自己取消的对象视为已被取代：其迟到的完成结果会被丢弃且不报告故障。

mod connector;
mod session;


use self::{connector::Connector, session::LinkSession};
use crate::{
    config::Config,
    error::{Error, Result},
    event::{ConnectionState, EventSink, LinkEvent, LinkFault},
    transport::{Connection, PeerAddress, Transport},
};
use bytes::Bytes;
use std::{fmt, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Establishes and supervises one stream link to a remote peer.
///
/// Cloning yields another handle to the same manager. When the last handle is
/// dropped any installed handle is closed and background tasks wind down
/// without further events.
///
/// 建立并监管到远端对端的单条流链路。
///
/// 克隆会得到同一管理器的另一个句柄。最后一个句柄被丢弃时，已安装的句柄会被关闭，
/// 后台任务随之结束且不再产生事件。
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

/// State reachable from the manager's background tasks.
struct Shared {
    slots: Mutex<Slots>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    config: Config,
}

/// Everything guarded by the manager's single lock.
#[derive(Default)]
struct Slots {
    state: ConnectionState,
    connector: Option<Connector>,
    session: Option<Arc<LinkSession>>,
    next_id: u64,
}

impl Slots {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn holds_connector(&self, id: u64) -> bool {
        matches!(&self.connector, Some(connector) if connector.id() == id)
    }

    fn holds_session(&self, id: u64) -> bool {
        matches!(&self.session, Some(session) if session.id() == id)
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.shared.transport)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates an idle manager with the default configuration.
    ///
    /// 使用默认配置创建空闲的管理器。
    pub fn new(transport: impl Transport, sink: impl EventSink) -> Self {
        Self::assemble(Arc::new(transport), Arc::new(sink), Config::default())
    }

    /// Creates an idle manager with a custom configuration.
    ///
    /// 使用自定义配置创建空闲的管理器。
    pub fn with_config(
        transport: impl Transport,
        sink: impl EventSink,
        config: Config,
    ) -> Result<Self> {
        Self::from_parts(Arc::new(transport), Arc::new(sink), config)
    }

    /// Creates a manager from already shared parts, rejecting an invalid
    /// configuration.
    ///
    /// 使用已共享的组件创建管理器，拒绝无效的配置。
    pub fn from_parts(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(transport, sink, config))
    }

    fn assemble(transport: Arc<dyn Transport>, sink: Arc<dyn EventSink>, config: Config) -> Self {
        debug!("创建连接管理器 | Creating connection manager");
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(Slots::default()),
                transport,
                sink,
                config,
            }),
        }
    }

    /// Returns the current state.
    ///
    /// 返回当前状态。
    pub async fn state(&self) -> ConnectionState {
        self.shared.slots.lock().await.state
    }

    /// Cancels whatever is installed and enters [`ConnectionState::Idle`].
    ///
    /// 取消已安装的一切并进入 [`ConnectionState::Idle`]。
    pub async fn start(&self) {
        let mut slots = self.shared.slots.lock().await;
        debug!("start");
        self.shared.clear(&mut slots).await;
        self.shared.set_state(&mut slots, ConnectionState::Idle);
    }

    /// Starts a connection attempt to `address`, superseding any attempt in
    /// flight and any established session.
    ///
    /// The attempt is never retried: a failure is reported once as
    /// [`LinkFault::ConnectFailed`] and the manager returns to idle.
    ///
    /// 开始连接 `address`，取代正在进行的尝试以及已建立的会话。
    /// 尝试不会自动重试：失败只报告一次 [`LinkFault::ConnectFailed`]，然后管理器回到空闲状态。
    pub async fn connect(&self, address: PeerAddress) {
        let mut slots = self.shared.slots.lock().await;
        debug!(%address, "connect");
        self.shared.clear(&mut slots).await;

        let id = slots.next_id();
        slots.connector = Some(Connector::spawn(
            id,
            address,
            self.shared.transport.clone(),
            Arc::downgrade(&self.shared),
        ));
        self.shared.set_state(&mut slots, ConnectionState::Connecting);
    }

    /// Installs a session over a handle obtained out-of-band, superseding
    /// anything currently installed. The session takes the handle over and
    /// closes it when it is cancelled or lost.
    ///
    /// 为带外获得的句柄安装会话，取代当前安装的一切。会话接管该句柄，并在被取消或断开时关闭它。
    pub async fn connected(&self, connection: Connection) {
        let mut slots = self.shared.slots.lock().await;
        self.shared.install_session(&mut slots, connection).await;
    }

    /// Cancels whatever is installed and enters [`ConnectionState::Idle`].
    /// Safe to call in any state.
    ///
    /// 取消已安装的一切并进入 [`ConnectionState::Idle`]。任何状态下调用都是安全的。
    pub async fn stop(&self) {
        let mut slots = self.shared.slots.lock().await;
        debug!("stop");
        self.shared.clear(&mut slots).await;
        self.shared.set_state(&mut slots, ConnectionState::Idle);
    }

    /// Writes `data` to the connected peer.
    ///
    /// Silently dropped unless the manager is connected. The lock is released
    /// before the write is issued, so a slow write never holds up `connect` or
    /// `stop`. Failures are reported as [`LinkFault::WriteFailed`] and leave
    /// the session installed.
    ///
    /// 向已连接的对端写入 `data`。
    ///
    /// 未连接时静默丢弃。发起写入前会释放锁，因此慢速写入不会阻塞 `connect` 或 `stop`。
    /// 失败以 [`LinkFault::WriteFailed`] 报告，会话保持安装状态。
    pub async fn write(&self, data: impl Into<Bytes>) {
        let data = data.into();
        let session = {
            let slots = self.shared.slots.lock().await;
            match (slots.state, &slots.session) {
                (ConnectionState::Connected, Some(session)) => session.clone(),
                _ => {
                    trace!(len = data.len(), state = %slots.state, "dropping write, link not connected");
                    return;
                }
            }
        };
        // The session reports its own failures.
        let _ = session.write(data).await;
    }

    #[cfg(test)]
    pub(crate) async fn installed(&self) -> (bool, bool) {
        let slots = self.shared.slots.lock().await;
        (slots.connector.is_some(), slots.session.is_some())
    }
}

impl Shared {
    /// Assigns the state and tells the sink, even if the value is unchanged.
    fn set_state(&self, slots: &mut Slots, state: ConnectionState) {
        debug!(from = %slots.state, to = %state, "连接状态变更 | Connection state changed");
        slots.state = state;
        self.sink.notify(LinkEvent::StateChanged(state));
    }

    /// Cancels and discards the installed connector and session.
    async fn clear(&self, slots: &mut Slots) {
        if let Some(connector) = slots.connector.take() {
            connector.cancel();
        }
        if let Some(session) = slots.session.take() {
            session.cancel().await;
        }
    }

    async fn install_session(self: &Arc<Self>, slots: &mut Slots, connection: Connection) {
        self.clear(slots).await;

        let id = slots.next_id();
        let session = LinkSession::new(
            id,
            connection.handle,
            self.sink.clone(),
            self.config.session.clone(),
        );
        info!(id, peer = %connection.peer_name, "链路会话已建立 | Link session established");

        self.sink.notify(LinkEvent::PeerName(connection.peer_name));
        self.set_state(slots, ConnectionState::Connected);

        // Started last so that no inbound data precedes the state change.
        session.start(Arc::downgrade(self));
        slots.session = Some(session);
    }

    /// Called by a connector whose attempt produced a stream.
    async fn connector_succeeded(self: &Arc<Self>, id: u64, connection: Connection) {
        let mut slots = self.slots.lock().await;
        if !slots.holds_connector(id) {
            debug!(id, "discarding stream of superseded connector");
            connection.handle.close();
            return;
        }
        // The connector has finished; there is nothing left to cancel.
        slots.connector = None;
        self.install_session(&mut slots, connection).await;
    }

    /// Called by a connector whose attempt failed, including attempts that
    /// failed because the manager cancelled them.
    async fn connector_failed(&self, id: u64, error: Error) {
        let mut slots = self.slots.lock().await;
        if !slots.holds_connector(id) {
            debug!(id, %error, "suppressing failure of superseded connector");
            return;
        }
        slots.connector = None;
        warn!(id, %error, "连接尝试失败 | Connection attempt failed");
        self.set_state(&mut slots, ConnectionState::Idle);
        self.sink.notify(LinkEvent::fault(LinkFault::ConnectFailed));
    }

    /// Called once by a session whose read loop ended.
    async fn session_lost(&self, id: u64, error: Error) {
        let mut slots = self.slots.lock().await;
        if !slots.holds_session(id) {
            debug!(id, %error, "suppressing loss of superseded session");
            return;
        }
        if let Some(session) = slots.session.take() {
            session.cancel().await;
        }
        warn!(id, %error, "链路已断开 | Link lost");
        self.set_state(&mut slots, ConnectionState::Idle);
        self.sink.notify(LinkEvent::fault(LinkFault::ConnectionLost));
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let slots = self.slots.get_mut();
        if let Some(connector) = slots.connector.take() {
            connector.cancel();
        }
        if let Some(session) = slots.session.take() {
            session.close();
        }
    }
}
