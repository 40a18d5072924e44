//! One-shot connection attempt running on its own task.
//!
//! 在独立任务上运行的一次性连接尝试。

use super::Shared;
use crate::{
    error::{Error, Result},
    transport::{CloseSignal, Connection, PeerAddress, Transport},
};
use std::sync::{Arc, Weak};
use tracing::debug;

/// A connection attempt in flight.
///
/// Closing its signal is the only way to stop it. A cancelled attempt still
/// runs its failure path; the manager recognizes the id as superseded and
/// stays quiet.
///
/// 进行中的连接尝试。关闭其信号是停止它的唯一方式。被取消的尝试仍会走失败路径；
/// 管理器会识别出该ID已被取代，不报告任何内容。
#[derive(Debug)]
pub(super) struct Connector {
    id: u64,
    address: PeerAddress,
    closed: Arc<CloseSignal>,
}

impl Connector {
    /// Spawns the attempt. The result is handed to the manager behind `shared`
    /// if it is still alive.
    pub(super) fn spawn(
        id: u64,
        address: PeerAddress,
        transport: Arc<dyn Transport>,
        shared: Weak<Shared>,
    ) -> Self {
        let closed = Arc::new(CloseSignal::new());

        let task_closed = closed.clone();
        let task_address = address.clone();
        tokio::spawn(async move {
            debug!(id, address = %task_address, "connector started");
            let result = attempt(transport.as_ref(), &task_address, &task_closed).await;

            let Some(shared) = shared.upgrade() else {
                if let Ok(connection) = result {
                    connection.handle.close();
                }
                return;
            };
            match result {
                Ok(connection) => shared.connector_succeeded(id, connection).await,
                Err(error) => shared.connector_failed(id, error).await,
            }
        });

        Self {
            id,
            address,
            closed,
        }
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    /// Aborts the attempt by closing what it is connecting through.
    pub(super) fn cancel(&self) {
        if self.closed.close() {
            debug!(id = self.id, address = %self.address, "connector cancelled");
        }
    }
}

/// Runs `transport.connect` until it resolves or `closed` is raised. Dropping
/// the connect future releases anything it had partially opened.
async fn attempt(
    transport: &dyn Transport,
    address: &PeerAddress,
    closed: &CloseSignal,
) -> Result<Connection> {
    tokio::select! {
        biased;
        _ = closed.closed() => Err(Error::HandleClosed),
        result = transport.connect(address) => result,
    }
}
