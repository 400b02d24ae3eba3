//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use thiserror::Error;

/// The primary error type for the reliable datagram protocol library.
/// 可靠数据报协议库的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error occurred.
    /// 发生了底层的I/O错误。
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred during address parsing.
    /// 地址解析期间发生错误。
    #[error("Address parsing error: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    /// Hostname resolution produced no usable address.
    /// 主机名解析没有产生可用的地址。
    #[error("No usable address")]
    AddressUnavailable,

    /// An argument was out of range: application command above the
    /// permitted sub-code range, or a payload too large for a datagram.
    /// 参数越界：应用命令超出允许的子码范围，或载荷超过单个数据报的容量。
    #[error("Invalid argument")]
    InvalidArgument,

    /// A received datagram was structurally invalid and could not be decoded.
    /// 接收到的数据报结构无效，无法解码。
    #[error("Malformed packet received")]
    MalformedPacket,

    /// A received packet acknowledged a sequence number we never sent.
    /// The whole packet is rejected.
    /// 接收到的包确认了一个我们从未发送过的序号。整个包被拒绝。
    #[error("Acknowledgement past highest sent sequence")]
    InvalidAck,

    /// The client attempted to send before the connection was established.
    /// 客户端在连接建立之前尝试发送。
    #[error("Not connected")]
    NotConnected,

    /// The peer association is closed or closing.
    /// 对端关联已关闭或正在关闭。
    #[error("Peer association is closed")]
    PeerClosed,

    /// An internal channel for communication between tasks was closed
    /// unexpectedly.
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
            Error::AddressUnavailable => ErrorKind::AddrNotAvailable.into(),
            Error::InvalidArgument => ErrorKind::InvalidInput.into(),
            Error::MalformedPacket => ErrorKind::InvalidData.into(),
            Error::InvalidAck => ErrorKind::InvalidData.into(),
            Error::NotConnected => ErrorKind::NotConnected.into(),
            Error::PeerClosed => ErrorKind::ConnectionReset.into(),
            Error::ChannelClosed => ErrorKind::BrokenPipe.into(),
        }
    }
}
