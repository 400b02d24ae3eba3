//! 定义协议的所有命令/包类型。
//! Defines all commands/packet types for the protocol.

use std::fmt;

/// First command code reserved for application packets. Codes in
/// `[APP_BASE, 0xFF]` carry user payloads; the application-visible
/// sub-code is `command - APP_BASE`.
/// 为应用数据包保留的第一个命令码。`[APP_BASE, 0xFF]` 范围内的命令码携带
/// 用户载荷；应用可见的子码是 `command - APP_BASE`。
pub const APP_BASE: u8 = 0x10;

/// Largest application sub-code that still fits in the command byte.
/// 仍能放入命令字节的最大应用子码。
pub const APP_MAX: u8 = 0xFF - APP_BASE;

/// The type of a packet. The first byte on the wire.
/// 包类型，网络传输的第一个字节。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Useless payload; a carrier for piggybacked acknowledgements.
    /// 无用载荷；用作捎带确认的载体。
    Noop,
    /// Close the association. No reply is expected.
    /// 关闭关联。不期待任何回复。
    Close,
    /// Connection request, sent reliably by the initiator.
    /// 连接请求，由发起方可靠发送。
    ConnReq,
    /// Connection response, acknowledges a `ConnReq`.
    /// 连接响应，确认 `ConnReq`。
    ConnRsp,
    /// Keep-alive probe carrying the sender's timestamp.
    /// 携带发送方时间戳的保活探测。
    Ping,
    /// Answer to `Ping`, echoing the timestamp verbatim.
    /// 对 `Ping` 的应答，原样回显时间戳。
    Pong,
    /// Application data packet with its sub-code (`command - APP_BASE`).
    /// 应用数据包及其子码（`command - APP_BASE`）。
    App(u8),
}

impl Command {
    /// Tries to convert a wire byte into a `Command`. Bytes in the gap
    /// between the protocol commands and `APP_BASE` are invalid.
    /// 尝试将线上字节转换成 `Command`。协议命令与 `APP_BASE` 之间的空隙
    /// 字节是无效的。
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Command::Noop),
            1 => Some(Command::Close),
            2 => Some(Command::ConnReq),
            3 => Some(Command::ConnRsp),
            4 => Some(Command::Ping),
            5 => Some(Command::Pong),
            b if b >= APP_BASE => Some(Command::App(b - APP_BASE)),
            _ => None,
        }
    }

    /// Returns the wire byte for this command.
    /// 返回该命令的线上字节。
    pub fn to_u8(self) -> u8 {
        match self {
            Command::Noop => 0,
            Command::Close => 1,
            Command::ConnReq => 2,
            Command::ConnRsp => 3,
            Command::Ping => 4,
            Command::Pong => 5,
            Command::App(sub) => APP_BASE + sub,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Noop => write!(f, "NOOP"),
            Command::Close => write!(f, "CLOSE"),
            Command::ConnReq => write!(f, "CONN-REQ"),
            Command::ConnRsp => write!(f, "CONN-RSP"),
            Command::Ping => write!(f, "PING"),
            Command::Pong => write!(f, "PONG"),
            Command::App(sub) => write!(f, "APP({})", sub),
        }
    }
}
