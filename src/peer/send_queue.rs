//! 出站包的有序队列。
//! The ordered queue of outbound packets.

use crate::packet::{Command, PacketFlags, PacketHeader, HEADER_SIZE};
use crate::peer::seq;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// A packet sitting in the send queue. Sequence numbers are assigned at
/// enqueue time; the acknowledgement fields are stamped at transmit time.
///
/// 发送队列中的一个包。序号在入队时分配；确认字段在发送时盖上。
#[derive(Debug, Clone)]
pub(crate) struct QueuedPacket {
    pub command: Command,
    pub flags: PacketFlags,
    pub reliable_ack: u16,
    pub reliable: u16,
    pub unreliable: u16,
    pub payload: Bytes,
}

impl QueuedPacket {
    /// Encodes the packet into a fresh datagram.
    /// 将包编码为一个新的数据报。
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        PacketHeader {
            command: self.command,
            flags: self.flags,
            reliable_ack: self.reliable_ack,
            reliable: self.reliable,
            unreliable: self.unreliable,
        }
        .encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// FIFO of outbound packets awaiting first transmit or acknowledgement.
///
/// Reliable packets remain queued until acknowledged; unreliable packets
/// are removed right after their single transmit attempt. Order is strictly
/// the order of enqueue.
///
/// 等待首次发送或确认的出站包FIFO。
///
/// 可靠包在被确认之前一直留在队列中；不可靠包在其唯一一次发送尝试之后
/// 立即移除。顺序严格为入队顺序。
#[derive(Debug, Default)]
pub(crate) struct SendQueue {
    queue: VecDeque<QueuedPacket>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: QueuedPacket) {
        self.queue.push_back(packet);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn front(&self) -> Option<&QueuedPacket> {
        self.queue.front()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut QueuedPacket> {
        self.queue.get_mut(index)
    }

    pub fn remove(&mut self, index: usize) -> Option<QueuedPacket> {
        self.queue.remove(index)
    }

    /// Releases the acknowledged prefix of the queue.
    ///
    /// Walks from the head and drops every entry that is reliable, has been
    /// transmitted at least once, and whose sequence is at or before `ack`
    /// under signed-delta comparison. The walk stops at the first entry
    /// failing any predicate, so a reliable packet that was never
    /// transmitted is never released.
    ///
    /// 释放队列中已被确认的前缀。
    ///
    /// 从队头开始遍历，丢弃每个满足以下条件的条目：可靠、至少发送过一次、
    /// 且其序号在带符号差值比较下不晚于 `ack`。遍历在第一个不满足任一条件
    /// 的条目处停止，因此从未发送过的可靠包绝不会被释放。
    pub fn release_acked(&mut self, ack: u16) -> usize {
        let mut released = 0;
        while let Some(head) = self.queue.front() {
            if !head.flags.contains(PacketFlags::RELIABLE)
                || !head.flags.contains(PacketFlags::RETRANSMITTED)
            {
                break;
            }
            if seq::delta(head.reliable, ack) > 0 {
                break;
            }
            self.queue.pop_front();
            released += 1;
        }
        released
    }
}
