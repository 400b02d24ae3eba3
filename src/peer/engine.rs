//! 对端协议状态机。
//! The peer protocol state machine.
//!
//! The engine is pure and synchronous: it consumes decoded packets and
//! explicit `Instant`s, and produces encoded datagrams plus upward events.
//! All socket I/O and timer plumbing lives in the async endpoint task.
//!
//! 引擎是纯同步的：消费已解码的包和显式传入的 `Instant`，产出编码后的
//! 数据报和向上的事件。所有套接字I/O和定时器管线都位于异步端点任务中。

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::command::APP_MAX;
use crate::packet::{Command, Packet, PacketFlags, HEADER_SIZE};
use crate::peer::rtt::{LinkInfo, RttEstimator};
use crate::peer::send_queue::{QueuedPacket, SendQueue};
use crate::peer::seq;
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// The lifecycle state of a peer association.
/// 对端关联的生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Freshly constructed on the server side, waiting for the handshake.
    /// 服务端新建，等待握手。
    New,
    /// Client side, connection request sent, waiting for the response.
    /// 客户端已发送连接请求，等待响应。
    Connecting,
    /// Handshake completed; all commands are accepted.
    /// 握手完成；接受所有命令。
    Run,
    /// Terminal state. Nothing is accepted or sent any more.
    /// 终止状态。不再接受或发送任何内容。
    Dead,
}

/// Why a peer association ended.
/// 对端关联结束的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The remote sent an explicit CLOSE.
    /// 远端发送了显式的CLOSE。
    Closed,
    /// No accepted packet arrived within the drop timeout.
    /// 在丢弃超时内没有任何被接受的包到达。
    TimedOut,
    /// The remote refused the connection request.
    /// 远端拒绝了连接请求。
    Refused,
}

/// An event the engine reports upward to its owner.
/// 引擎向其所有者上报的事件。
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The handshake completed and the association entered [`PeerState::Run`].
    /// 握手完成，关联进入 [`PeerState::Run`]。
    Connected,
    /// An application packet was delivered in sequence.
    /// 一个应用包已按序投递。
    Packet { sub_command: u8, payload: Bytes },
    /// The link quality estimators were updated.
    /// 链路质量估算器已更新。
    LinkInfo(LinkInfo),
    /// The association is gone. Delivered exactly once.
    /// 关联已终结。恰好投递一次。
    Dropped(DropReason),
}

/// How an inbound data-bearing packet relates to the receive sequence.
/// 入站数据包与接收序号的关系。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Sequenced,
    Unsequenced,
    Retransmitted,
}

/// The per-peer protocol engine.
///
/// One instance per remote peer. It owns the sequence counters, the RTT
/// estimators, the send queue and the liveness deadline, and implements the
/// complete packet-in / datagram-out protocol logic.
///
/// 每对端协议引擎。
///
/// 每个远端对端一个实例。它拥有序号计数器、RTT估算器、发送队列和存活
/// 截止时间，并实现完整的“包进/数据报出”协议逻辑。
#[derive(Debug)]
pub struct PeerEngine {
    remote_addr: SocketAddr,
    config: Config,
    state: PeerState,

    /// Millisecond reference point for PING timestamps.
    /// PING时间戳的毫秒参考点。
    epoch: Instant,

    /// Highest accepted reliable sequence from the remote.
    /// 从远端接受的最高可靠序号。
    pub(crate) in_rel: u16,
    /// Highest accepted unreliable sequence under the current `in_rel` epoch.
    /// 当前 `in_rel` 纪元下接受的最高不可靠序号。
    pub(crate) in_unrel: u16,
    /// Most recently assigned outbound reliable sequence.
    /// 最近分配的出站可靠序号。
    pub(crate) out_rel: u16,
    /// Most recently assigned outbound unreliable sequence in this epoch.
    /// 本纪元内最近分配的出站不可靠序号。
    pub(crate) out_unrel: u16,
    /// Highest of our reliable sequences the remote has acknowledged.
    /// 远端已确认的我方可靠序号中的最高者。
    pub(crate) out_acked: u16,

    rtt: RttEstimator,
    /// Timestamp of the most recent datagram transmission.
    /// 最近一次数据报发送的时间戳。
    last_out_time: Instant,
    /// Absolute deadline past which the association is declared dead.
    /// 超过即宣告关联死亡的绝对截止时间。
    drop_deadline: Instant,
    /// The next outbound datagram must carry an ACK of `in_rel`.
    /// 下一个出站数据报必须携带对 `in_rel` 的确认。
    must_ack: bool,

    pub(crate) send_queue: SendQueue,

    /// Last `send_to` error, latched for the next enqueue.
    /// 最近一次 `send_to` 的错误，留待下一次入队时返回。
    sendto_err: Option<std::io::ErrorKind>,
}

impl PeerEngine {
    fn new(remote_addr: SocketAddr, config: Config, state: PeerState, now: Instant) -> Self {
        let timing = config.timing.clone();
        let out_rel: u16 = rand::random();
        Self {
            remote_addr,
            state,
            epoch: now,
            in_rel: u16::MAX,
            in_unrel: 0,
            out_rel,
            out_unrel: 0,
            out_acked: out_rel.wrapping_sub(1),
            rtt: RttEstimator::new(timing.initial_srtt, timing.max_rto),
            last_out_time: now,
            drop_deadline: now + timing.drop_timeout,
            must_ack: false,
            send_queue: SendQueue::new(),
            sendto_err: None,
            config,
        }
    }

    /// Creates a server-side engine for a peer that just showed up with a
    /// connection request.
    /// 为刚带着连接请求出现的对端创建服务端引擎。
    pub fn new_incoming(remote_addr: SocketAddr, config: Config, now: Instant) -> Self {
        Self::new(remote_addr, config, PeerState::New, now)
    }

    /// Creates a client-side engine and queues the reliable connection
    /// request.
    /// 创建客户端引擎并将可靠的连接请求入队。
    pub fn new_outgoing(remote_addr: SocketAddr, config: Config, now: Instant) -> Self {
        let mut engine = Self::new(remote_addr, config, PeerState::Connecting, now);
        engine.enqueue_reliable(Command::ConnReq, Bytes::from_static(&[0, 0, 0, 0]));
        engine
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Whether the association reached its terminal state.
    pub fn is_dead(&self) -> bool {
        self.state == PeerState::Dead
    }

    /// The remote address this engine is bound to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn now_millis(&self, now: Instant) -> u64 {
        now.duration_since(self.epoch).as_millis() as u64
    }

    // --- Enqueueing ---

    fn enqueue_unreliable(&mut self, command: Command, payload: Bytes) {
        self.out_unrel = self.out_unrel.wrapping_add(1);
        trace!(
            addr = %self.remote_addr,
            %command,
            reliable = self.out_rel,
            unreliable = self.out_unrel,
            "queueing unreliable packet"
        );
        self.send_queue.push(QueuedPacket {
            command,
            flags: PacketFlags::empty(),
            reliable_ack: 0,
            reliable: self.out_rel,
            unreliable: self.out_unrel,
            payload,
        });
    }

    fn enqueue_reliable(&mut self, command: Command, payload: Bytes) {
        self.out_rel = self.out_rel.wrapping_add(1);
        self.out_unrel = 0;
        trace!(
            addr = %self.remote_addr,
            %command,
            reliable = self.out_rel,
            "queueing reliable packet"
        );
        self.send_queue.push(QueuedPacket {
            command,
            flags: PacketFlags::RELIABLE,
            reliable_ack: 0,
            reliable: self.out_rel,
            unreliable: 0,
            payload,
        });
    }

    fn latched_send_error(&self) -> Result<()> {
        match self.sendto_err {
            Some(kind) => Err(Error::Io(kind.into())),
            None => Ok(()),
        }
    }

    /// Queues an application packet.
    ///
    /// The sub-command must fit the command byte and the payload must fit a
    /// receive buffer. Returns the latched I/O error of the previous
    /// transmission, if any; the packet is enqueued either way.
    ///
    /// 将一个应用包入队。
    ///
    /// 子命令必须能放入命令字节，载荷必须能放入接收缓冲区。若上一次发送
    /// 存在被记录的I/O错误则返回它；无论如何包都会入队。
    pub fn send_app(&mut self, reliable: bool, sub_command: u8, payload: Bytes) -> Result<()> {
        if sub_command > APP_MAX {
            return Err(Error::InvalidArgument);
        }
        if payload.len() > self.config.transport.recv_buffer_size.saturating_sub(HEADER_SIZE) {
            return Err(Error::InvalidArgument);
        }
        if reliable {
            self.enqueue_reliable(Command::App(sub_command), payload);
        } else {
            self.enqueue_unreliable(Command::App(sub_command), payload);
        }
        self.latched_send_error()
    }

    /// Builds the single best-effort CLOSE datagram, bypassing the send
    /// queue, and moves the engine to its terminal state. The caller sends
    /// the datagram and tears the peer down without waiting for anything.
    ///
    /// 构建唯一一个尽力而为的CLOSE数据报（绕过发送队列），并将引擎置于
    /// 终止状态。调用者发送该数据报后即可拆除对端，无需等待。
    pub fn close(&mut self) -> Bytes {
        self.out_unrel = self.out_unrel.wrapping_add(1);
        let close = QueuedPacket {
            command: Command::Close,
            flags: PacketFlags::empty(),
            reliable_ack: 0,
            reliable: self.out_rel,
            unreliable: self.out_unrel,
            payload: Bytes::new(),
        };
        debug!(addr = %self.remote_addr, "sending CLOSE, tearing association down");
        self.state = PeerState::Dead;
        close.encode()
    }

    /// Records the outcome of the last raw socket transmission.
    /// 记录最近一次底层套接字发送的结果。
    pub fn record_send_result(&mut self, result: std::result::Result<(), std::io::ErrorKind>) {
        self.sendto_err = result.err();
    }

    /// Silently moves the engine to its terminal state, without emitting a
    /// drop event or a CLOSE datagram. Used when a freshly constructed
    /// server-side peer rejects its handshake packet.
    /// 将引擎静默置于终止状态，不产生丢弃事件也不发送CLOSE数据报。用于
    /// 服务端新建对端拒绝其握手包的场合。
    pub(crate) fn abort(&mut self) {
        self.state = PeerState::Dead;
    }

    // --- Inbound processing ---

    /// Processes one decoded inbound packet.
    ///
    /// Acknowledgement processing happens first and can reject the whole
    /// packet; then the packet is classified against the receive sequences
    /// and dispatched. Every accepted reliable packet schedules an ACK.
    ///
    /// 处理一个已解码的入站包。
    ///
    /// 先处理确认，它可能拒绝整个包；然后根据接收序号对包进行分类并分发。
    /// 每个被接受的可靠包都会安排一次确认。
    pub fn handle_packet(
        &mut self,
        packet: Packet,
        now: Instant,
        events: &mut Vec<PeerEvent>,
    ) -> Result<()> {
        if self.state == PeerState::Dead {
            debug!(addr = %self.remote_addr, "packet for dead peer, ignoring");
            return Ok(());
        }

        let header = *packet.header();
        trace!(
            addr = %self.remote_addr,
            state = ?self.state,
            command = %header.command,
            flags = %header.flags,
            reliable = header.reliable,
            unreliable = header.unreliable,
            "incoming packet"
        );

        if header.flags.contains(PacketFlags::ACK) {
            if let Err(err) = self.process_ack(header.reliable_ack) {
                warn!(
                    addr = %self.remote_addr,
                    ack = header.reliable_ack,
                    highest_sent = self.out_rel,
                    "ack past highest sent sequence, rejecting packet"
                );
                return Err(err);
            }
        }

        let classification = if header.flags.contains(PacketFlags::RELIABLE) {
            self.classify_reliable(header.reliable)
        } else {
            self.classify_unreliable(header.reliable, header.unreliable)
        };

        match classification {
            Classification::Unsequenced => match (self.state, &packet) {
                (PeerState::New, Packet::ConnReq { header, .. }) => {
                    let reliable = header.reliable;
                    self.handle_conn_req(reliable, events);
                }
                (PeerState::Connecting, Packet::ConnRsp { header, accepted }) => {
                    let (reliable, reliable_ack, accepted) =
                        (header.reliable, header.reliable_ack, *accepted);
                    self.handle_conn_rsp(reliable, reliable_ack, accepted, events);
                }
                _ => {
                    warn!(
                        addr = %self.remote_addr,
                        state = ?self.state,
                        command = %header.command,
                        expected = seq::next(self.in_rel),
                        "unsequenced packet, ignored"
                    );
                }
            },

            Classification::Retransmitted => {
                self.drop_deadline = now + self.config.timing.drop_timeout;
                // A first CONN-REQ whose sequence collides with the initial
                // in_rel classifies as retransmitted; the handshake must
                // still complete.
                if let (PeerState::New, Packet::ConnReq { header, .. }) = (self.state, &packet) {
                    let reliable = header.reliable;
                    self.handle_conn_req(reliable, events);
                }
            }

            Classification::Sequenced => {
                self.drop_deadline = now + self.config.timing.drop_timeout;
                if self.dispatch_sequenced(packet, now, events) {
                    // CLOSE: the association is gone, nothing else to do.
                    return Ok(());
                }
            }
        }

        if header.flags.contains(PacketFlags::RELIABLE) {
            trace!(addr = %self.remote_addr, in_rel = self.in_rel, "reliable packet, posting ack");
            self.post_ack();
        }

        Ok(())
    }

    /// Dispatches a sequenced packet by command. Returns true when the
    /// packet terminated the association.
    /// 按命令分发一个有序包。当包终结了关联时返回 true。
    fn dispatch_sequenced(
        &mut self,
        packet: Packet,
        now: Instant,
        events: &mut Vec<PeerEvent>,
    ) -> bool {
        match packet {
            Packet::Close { .. } => {
                debug!(addr = %self.remote_addr, "remote closed the association");
                self.state = PeerState::Dead;
                events.push(PeerEvent::Dropped(DropReason::Closed));
                return true;
            }

            Packet::Ping { header, timestamp } => {
                if self.state == PeerState::Run {
                    // A retransmitted PING is acknowledged but not answered,
                    // so the RTT sample pipeline never sees an ambiguous echo.
                    if header.flags.contains(PacketFlags::RETRANSMITTED) {
                        trace!(addr = %self.remote_addr, "retransmitted ping, not answering");
                    } else {
                        trace!(addr = %self.remote_addr, "answering ping");
                        let mut payload = bytes::BytesMut::with_capacity(8);
                        bytes::BufMut::put_u64(&mut payload, timestamp);
                        self.enqueue_unreliable(Command::Pong, payload.freeze());
                    }
                } else {
                    warn!(addr = %self.remote_addr, state = ?self.state, "ping while not running");
                }
            }

            Packet::Pong { timestamp, .. } => {
                if self.state == PeerState::Run {
                    let rtt = self.now_millis(now).saturating_sub(timestamp);
                    self.rtt.sample(rtt);
                    let info = self.rtt.link_info();
                    debug!(
                        addr = %self.remote_addr,
                        rtt_ms = rtt,
                        srtt = ?info.srtt,
                        rttvar = ?info.rttvar,
                        rto = ?info.rto,
                        "rtt sample"
                    );
                    events.push(PeerEvent::LinkInfo(info));
                } else {
                    warn!(addr = %self.remote_addr, state = ?self.state, "pong while not running");
                }
            }

            Packet::Noop { .. } => {}

            // Adjacent-by-chance initial sequences classify the handshake as
            // sequenced; the handshake must still complete.
            Packet::ConnReq { header, .. } if self.state == PeerState::New => {
                self.handle_conn_req(header.reliable, events);
            }
            Packet::ConnRsp { header, accepted } if self.state == PeerState::Connecting => {
                self.handle_conn_rsp(header.reliable, header.reliable_ack, accepted, events);
            }
            Packet::ConnReq { .. } | Packet::ConnRsp { .. } => {}

            Packet::App {
                sub_command,
                payload,
                ..
            } => {
                if self.state == PeerState::Run {
                    events.push(PeerEvent::Packet {
                        sub_command,
                        payload,
                    });
                } else {
                    warn!(
                        addr = %self.remote_addr,
                        state = ?self.state,
                        "application payload while not running, dropped"
                    );
                }
            }
        }
        false
    }

    fn handle_conn_req(&mut self, reliable: u16, events: &mut Vec<PeerEvent>) {
        debug!(addr = %self.remote_addr, "answering connection request");
        self.enqueue_unreliable(Command::ConnRsp, Bytes::from_static(&[0, 0, 0, 1]));
        self.in_rel = reliable;
        self.state = PeerState::Run;
        events.push(PeerEvent::Connected);
    }

    fn handle_conn_rsp(
        &mut self,
        reliable: u16,
        reliable_ack: u16,
        accepted: u32,
        events: &mut Vec<PeerEvent>,
    ) {
        if accepted == 0 {
            debug!(addr = %self.remote_addr, "connection refused by remote");
            self.state = PeerState::Dead;
            events.push(PeerEvent::Dropped(DropReason::Refused));
            return;
        }
        debug!(addr = %self.remote_addr, "connection accepted");
        self.in_rel = reliable;
        let _ = self.process_ack(reliable_ack);
        self.state = PeerState::Run;
        events.push(PeerEvent::Connected);
    }

    /// Applies a received acknowledgement.
    ///
    /// A stale ack is silently ignored; an ack advancing past the highest
    /// sequence ever sent rejects the packet. Otherwise the acknowledged
    /// prefix of the send queue is released.
    ///
    /// 应用一个收到的确认。
    ///
    /// 过期的确认被静默忽略；超过已发送最高序号的确认会导致整个包被拒绝。
    /// 否则释放发送队列中已被确认的前缀。
    fn process_ack(&mut self, ack: u16) -> Result<()> {
        if seq::delta(ack, self.out_acked) < 0 {
            return Ok(());
        }
        if seq::delta(ack, self.out_rel) > 0 {
            return Err(Error::InvalidAck);
        }

        self.out_acked = ack;
        let released = self.send_queue.release_acked(ack);
        trace!(
            addr = %self.remote_addr,
            ack,
            released,
            queued = self.send_queue.len(),
            "acknowledged sequence advanced"
        );
        Ok(())
    }

    /// Classifies a reliable packet and advances the reliable receive
    /// sequence when it is the expected successor.
    /// 对可靠包进行分类，并在其为期望的后继时推进可靠接收序号。
    fn classify_reliable(&mut self, reliable: u16) -> Classification {
        if self.in_rel == reliable {
            return Classification::Retransmitted;
        }
        if seq::next(self.in_rel) != reliable {
            return Classification::Unsequenced;
        }
        self.in_rel = reliable;
        self.in_unrel = 0;
        Classification::Sequenced
    }

    /// Classifies an unreliable packet. It is sequenced only when it belongs
    /// to the current reliable epoch and advances the unreliable sequence.
    /// 对不可靠包进行分类。仅当其属于当前可靠纪元并推进不可靠序号时才算有序。
    fn classify_unreliable(&mut self, reliable: u16, unreliable: u16) -> Classification {
        if self.in_rel != reliable {
            return Classification::Unsequenced;
        }
        if seq::delta(unreliable, self.in_unrel) <= 0 {
            return Classification::Unsequenced;
        }
        self.in_unrel = unreliable;
        Classification::Sequenced
    }

    /// Schedules an acknowledgement of `in_rel`. Any queued packet can carry
    /// it; when the queue is empty a NOOP is enqueued as a carrier.
    /// 安排对 `in_rel` 的确认。任何排队中的包都可以携带它；当队列为空时
    /// 入队一个NOOP作为载体。
    fn post_ack(&mut self) {
        self.must_ack = true;
        if self.send_queue.is_empty() {
            trace!(addr = %self.remote_addr, "empty queue, pushing NOOP ack carrier");
            self.enqueue_unreliable(Command::Noop, Bytes::new());
        }
    }

    // --- Service ---

    /// One service cycle: liveness check, keep-alive, send-queue walk.
    ///
    /// Encoded datagrams ready for transmission are appended to `out` in
    /// order. At most one retransmission happens per cycle; the RTO doubles
    /// with it.
    ///
    /// 一次服务周期：存活检查、保活、发送队列遍历。
    ///
    /// 准备好发送的编码数据报按序追加到 `out`。每个周期最多发生一次重传；
    /// RTO随之翻倍。
    pub fn service(&mut self, now: Instant, out: &mut Vec<Bytes>, events: &mut Vec<PeerEvent>) {
        if self.state == PeerState::Dead {
            return;
        }

        if now > self.drop_deadline {
            debug!(addr = %self.remote_addr, "drop deadline passed, peer is lost");
            self.state = PeerState::Dead;
            events.push(PeerEvent::Dropped(DropReason::TimedOut));
            return;
        }

        if self.send_queue.is_empty()
            && now.duration_since(self.last_out_time) > self.config.timing.action_timeout
        {
            let timestamp = self.now_millis(now);
            trace!(addr = %self.remote_addr, timestamp, "idle, pushing keep-alive PING");
            let mut payload = bytes::BytesMut::with_capacity(8);
            bytes::BufMut::put_u64(&mut payload, timestamp);
            self.enqueue_reliable(Command::Ping, payload.freeze());
        }

        let mut index = 0;
        while index < self.send_queue.len() {
            let must_ack = self.must_ack;
            let in_rel = self.in_rel;

            let Some(entry) = self.send_queue.get_mut(index) else {
                break;
            };
            if must_ack {
                entry.flags.insert(PacketFlags::ACK);
                entry.reliable_ack = in_rel;
            } else {
                entry.reliable_ack = 0;
            }

            let flags = entry.flags;
            trace!(
                addr = %self.remote_addr,
                command = %entry.command,
                flags = %flags,
                reliable = entry.reliable,
                unreliable = entry.unreliable,
                "transmitting"
            );
            out.push(entry.encode());
            self.last_out_time = now;

            if flags.contains(PacketFlags::RELIABLE) {
                if flags.contains(PacketFlags::RETRANSMITTED) {
                    // Second-or-later attempt: back off and stop the walk.
                    self.rtt.backoff();
                    break;
                }
                if let Some(entry) = self.send_queue.get_mut(index) {
                    entry.flags.insert(PacketFlags::RETRANSMITTED);
                }
                index += 1;
            } else {
                self.send_queue.remove(index);
            }
        }
    }

    /// Computes the next time the service routine must run.
    ///
    /// A queue head awaiting retransmission wakes at `last_out_time + rto`;
    /// an un-transmitted head wakes immediately; an empty queue waits one
    /// action timeout. The wake is always clipped by the drop deadline and
    /// floored at one millisecond to guarantee forward progress.
    ///
    /// 计算服务例程下一次必须运行的时间。
    ///
    /// 等待重传的队头在 `last_out_time + rto` 唤醒；未发送过的队头立即
    /// 唤醒；空队列等待一个动作超时。唤醒时间总是被丢弃截止时间裁剪，并
    /// 以一毫秒为下限以保证前进。
    pub fn next_wake(&self, now: Instant) -> Instant {
        let mut delta = self.config.timing.action_timeout;

        if let Some(head) = self.send_queue.front() {
            delta = if head.flags.contains(PacketFlags::RETRANSMITTED) {
                (self.last_out_time + self.rtt.rto()).duration_since(now)
            } else {
                Duration::ZERO
            };
        }

        let until_drop = self.drop_deadline.duration_since(now);
        if until_drop < delta {
            delta = until_drop;
        }
        if delta < Duration::from_millis(1) {
            delta = Duration::from_millis(1);
        }

        now + delta
    }
}
