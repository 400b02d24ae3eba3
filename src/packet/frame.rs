//! 定义了可以在网络上传输的完整数据包。
//! Defines the complete packets that can be transmitted over the network.

use super::command::Command;
use super::header::{PacketHeader, HEADER_SIZE};
use bytes::{Buf, BufMut, Bytes};

/// A complete protocol packet that can be sent or received.
/// 一个可以被发送或接收的完整协议包。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A NOOP packet. Carries nothing but the header (and therefore a
    /// possible piggybacked ACK).
    /// NOOP 包。除了包头（以及可能捎带的ACK）之外不携带任何内容。
    Noop { header: PacketHeader },
    /// A CLOSE packet terminating the association.
    /// 终止关联的 CLOSE 包。
    Close { header: PacketHeader },
    /// A connection request with its opaque 4-byte cookie.
    /// 携带4字节不透明cookie的连接请求。
    ConnReq { header: PacketHeader, cookie: u32 },
    /// A connection response; `accepted` is nonzero when the connection
    /// was accepted.
    /// 连接响应；当连接被接受时 `accepted` 非零。
    ConnRsp { header: PacketHeader, accepted: u32 },
    /// A keep-alive probe carrying the sender's millisecond timestamp.
    /// 携带发送方毫秒时间戳的保活探测。
    Ping { header: PacketHeader, timestamp: u64 },
    /// The answer to a PING, echoing the timestamp verbatim.
    /// 对 PING 的应答，原样回显时间戳。
    Pong { header: PacketHeader, timestamp: u64 },
    /// An application packet with an arbitrary payload.
    /// 携带任意载荷的应用包。
    App {
        header: PacketHeader,
        sub_command: u8,
        payload: Bytes,
    },
}

impl Packet {
    /// Decodes a packet from a received datagram.
    ///
    /// Returns `None` when the datagram is shorter than the header, the
    /// command byte is invalid, or the typed payload the command requires
    /// is incomplete. No semantic validation happens here.
    ///
    /// 从接收到的数据报解码一个包。
    ///
    /// 当数据报短于包头、命令字节无效、或命令要求的类型化载荷不完整时返回
    /// `None`。此处不做任何语义校验。
    pub fn decode(datagram: &[u8]) -> Option<Self> {
        let mut cursor = datagram;
        let header = PacketHeader::decode(&mut cursor)?;

        match header.command {
            Command::Noop => Some(Packet::Noop { header }),
            Command::Close => Some(Packet::Close { header }),
            Command::ConnReq => {
                if cursor.remaining() < 4 {
                    return None;
                }
                Some(Packet::ConnReq {
                    header,
                    cookie: cursor.get_u32(),
                })
            }
            Command::ConnRsp => {
                if cursor.remaining() < 4 {
                    return None;
                }
                Some(Packet::ConnRsp {
                    header,
                    accepted: cursor.get_u32(),
                })
            }
            Command::Ping => {
                if cursor.remaining() < 8 {
                    return None;
                }
                Some(Packet::Ping {
                    header,
                    timestamp: cursor.get_u64(),
                })
            }
            Command::Pong => {
                if cursor.remaining() < 8 {
                    return None;
                }
                Some(Packet::Pong {
                    header,
                    timestamp: cursor.get_u64(),
                })
            }
            Command::App(sub_command) => Some(Packet::App {
                header,
                sub_command,
                payload: Bytes::copy_from_slice(cursor),
            }),
        }
    }

    /// 将包编码到缓冲区。
    /// Encodes the packet into a buffer.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        self.header().encode(buf);
        match self {
            Packet::Noop { .. } | Packet::Close { .. } => {}
            Packet::ConnReq { cookie, .. } => buf.put_u32(*cookie),
            Packet::ConnRsp { accepted, .. } => buf.put_u32(*accepted),
            Packet::Ping { timestamp, .. } | Packet::Pong { timestamp, .. } => {
                buf.put_u64(*timestamp)
            }
            Packet::App { payload, .. } => buf.put_slice(payload),
        }
    }

    /// Returns the fixed header of the packet.
    /// 返回包的固定包头。
    pub fn header(&self) -> &PacketHeader {
        match self {
            Packet::Noop { header }
            | Packet::Close { header }
            | Packet::ConnReq { header, .. }
            | Packet::ConnRsp { header, .. }
            | Packet::Ping { header, .. }
            | Packet::Pong { header, .. }
            | Packet::App { header, .. } => header,
        }
    }

    /// Total encoded length of the packet in bytes.
    /// 包编码后的总字节长度。
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + match self {
                Packet::Noop { .. } | Packet::Close { .. } => 0,
                Packet::ConnReq { .. } | Packet::ConnRsp { .. } => 4,
                Packet::Ping { .. } | Packet::Pong { .. } => 8,
                Packet::App { payload, .. } => payload.len(),
            }
    }
}
