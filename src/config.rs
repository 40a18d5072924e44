//! 定义了连接管理器的可配置参数。
//! Defines configurable parameters for the connection manager.

use crate::error::{Error, Result};

/// A structure containing all configurable parameters for a connection manager.
///
/// 包含连接管理器所有可配置参数的结构体。
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Parameters of the established link session.
    /// 已建立链路会话的参数。
    pub session: SessionConfig,
}

/// Link session parameters.
///
/// 链路会话参数。
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The size of the buffer each read is performed into. Every inbound event
    /// carries at most this many bytes.
    /// 每次读取使用的缓冲区大小。每个入站事件最多携带这么多字节。
    pub read_buffer_size: usize,
    /// Whether successful writes are echoed back to the event sink.
    /// 成功的写入是否回显给事件接收器。
    pub echo_writes: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            echo_writes: true,
        }
    }
}

impl Config {
    /// Checks that every parameter is usable.
    ///
    /// 检查每个参数是否可用。
    pub fn validate(&self) -> Result<()> {
        if self.session.read_buffer_size == 0 {
            return Err(Error::InvalidConfig("read_buffer_size must be non-zero"));
        }
        Ok(())
    }
}
