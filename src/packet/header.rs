//! 定义固定的8字节包头。
//! Defines the fixed 8-byte packet header.

use super::command::Command;
use bytes::{Buf, BufMut};
use std::fmt;

/// Size of the fixed header that starts every datagram.
pub const HEADER_SIZE: usize = 8;

/// The header flag bitfield.
/// 包头标志位域。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// Delivery is reliable; the packet stays queued until acknowledged.
    /// 可靠投递；包在被确认之前一直留在队列中。
    pub const RELIABLE: PacketFlags = PacketFlags(1);
    /// The packet carries an acknowledgement in `reliable_ack`.
    /// 包在 `reliable_ack` 中携带确认。
    pub const ACK: PacketFlags = PacketFlags(2);
    /// The packet was transmitted at least once before.
    /// 包之前至少被传输过一次。
    pub const RETRANSMITTED: PacketFlags = PacketFlags(4);

    /// An empty flag set.
    /// 空标志集。
    pub fn empty() -> Self {
        PacketFlags(0)
    }

    /// Reconstructs the flag set from a wire byte. Unknown bits are kept
    /// verbatim so a newer peer's flags survive a round trip.
    /// 从线上字节重建标志集。未知位原样保留，使较新对端的标志能完整往返。
    pub fn from_bits(bits: u8) -> Self {
        PacketFlags(bits)
    }

    /// Returns the wire byte.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Checks whether every flag in `other` is set.
    /// 检查 `other` 中的每个标志是否都已置位。
    pub fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the flags in `other`.
    pub fn insert(&mut self, other: PacketFlags) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for PacketFlags {
    type Output = PacketFlags;

    fn bitor(self, rhs: PacketFlags) -> PacketFlags {
        PacketFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for PacketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.contains(Self::RELIABLE) { "R" } else { "-" },
            if self.contains(Self::ACK) { "A" } else { "-" },
            if self.contains(Self::RETRANSMITTED) { "T" } else { "-" },
        )
    }
}

/// The fixed header beginning every packet. All multi-byte fields are
/// transmitted in network byte order.
///
/// 每个包开头的固定包头。所有多字节字段均按网络字节序传输。
///
/// ```text
/// 0       1       2               4               6               8
/// +-------+-------+---------------+---------------+---------------+
/// |command| flags | reliable_ack  |   reliable    |  unreliable   |
/// +-------+-------+---------------+---------------+---------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// The command of the packet.
    /// 包的命令。
    pub command: Command,
    /// The flag bitfield.
    /// 标志位域。
    pub flags: PacketFlags,
    /// Acknowledged reliable sequence. Valid iff the ACK flag is set.
    /// 被确认的可靠序号。仅当ACK标志置位时有效。
    pub reliable_ack: u16,
    /// The sender's current reliable sequence number.
    /// 发送方当前的可靠序号。
    pub reliable: u16,
    /// The sender's current unreliable sequence number, scoped to the
    /// reliable sequence epoch.
    /// 发送方当前的不可靠序号，作用域为可靠序号纪元。
    pub unreliable: u16,
}

impl PacketHeader {
    /// 将包头编码到缓冲区。
    /// Encodes the header into a buffer.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.command.to_u8());
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.reliable_ack);
        buf.put_u16(self.reliable);
        buf.put_u16(self.unreliable);
    }

    /// 从缓冲区解码包头。
    /// Decodes a header from a buffer.
    pub fn decode<B: Buf>(buf: &mut B) -> Option<Self> {
        if buf.remaining() < HEADER_SIZE {
            return None;
        }
        let command = Command::from_u8(buf.get_u8())?;
        Some(PacketHeader {
            command,
            flags: PacketFlags::from_bits(buf.get_u8()),
            reliable_ack: buf.get_u16(),
            reliable: buf.get_u16(),
            unreliable: buf.get_u16(),
        })
    }
}
