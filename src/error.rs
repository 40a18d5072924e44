//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use thiserror::Error;

/// The primary error type for the serial link library.
/// 串行链路库的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error occurred.
    /// 发生了底层的I/O错误。
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred during socket address parsing.
    /// 套接字地址解析期间发生错误。
    #[error("Address parsing error: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    /// The peer address is empty or otherwise unusable.
    /// 对端地址为空或无法使用。
    #[error("Invalid peer address: {0:?}")]
    InvalidAddress(String),

    /// A configuration value is out of range.
    /// 配置值超出范围。
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Nothing accepted the connection attempt at the given address.
    /// 给定地址上没有任何对象接受连接尝试。
    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    /// The connection attempt was abandoned before it could be resolved.
    ///
    /// 连接尝试在完成之前被放弃。
    #[error("Connection attempt was abandoned")]
    ConnectionAborted,

    /// The connection was closed by the peer.
    /// 连接被对端关闭。
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// The handle has been closed locally; pending and future I/O fails with this.
    /// 句柄已在本地关闭；挂起和之后的I/O都会以此失败。
    #[error("Link handle is closed")]
    HandleClosed,

    /// An internal channel for communication between tasks was closed unexpectedly.
    /// 用于任务间通信的内部通道意外关闭。
    #[error("Internal channel is broken")]
    ChannelClosed,
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        match err {
            Error::Io(e) => e,
            Error::AddressParse(e) => std::io::Error::new(ErrorKind::InvalidInput, e),
            Error::InvalidAddress(addr) => std::io::Error::new(ErrorKind::InvalidInput, addr),
            Error::InvalidConfig(msg) => std::io::Error::new(ErrorKind::InvalidInput, msg),
            Error::ConnectionRefused(_) => ErrorKind::ConnectionRefused.into(),
            Error::ConnectionAborted => ErrorKind::ConnectionAborted.into(),
            Error::ConnectionClosed => ErrorKind::ConnectionReset.into(),
            Error::HandleClosed => ErrorKind::NotConnected.into(),
            Error::ChannelClosed => ErrorKind::BrokenPipe.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn test_io_error_conversion_keeps_kind() {
        let io: std::io::Error = Error::ConnectionRefused("00:11:22:33:44:55".into()).into();
        assert_eq!(io.kind(), ErrorKind::ConnectionRefused);

        let io: std::io::Error = Error::HandleClosed.into();
        assert_eq!(io.kind(), ErrorKind::NotConnected);

        let original = std::io::Error::new(ErrorKind::TimedOut, "radio silent");
        let io: std::io::Error = Error::Io(original).into();
        assert_eq!(io.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(Error::HandleClosed.to_string(), "Link handle is closed");
        assert_eq!(
            Error::InvalidAddress(" ".into()).to_string(),
            "Invalid peer address: \" \""
        );
    }
}
