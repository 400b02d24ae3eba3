//! 定义了协议和连接的可配置参数。
//! Defines configurable parameters for the protocol and its connections.

use std::time::Duration;

/// A structure containing all configurable parameters for a peer association.
///
/// 包含对端关联所有可配置参数的结构体。
#[derive(Debug, Clone)]
pub struct Config {
    /// Timing-related protocol parameters.
    /// 与时间相关的协议参数。
    pub timing: TimingConfig,

    /// Socket and channel related parameters.
    /// 套接字和通道相关参数。
    pub transport: TransportConfig,
}

/// Timing-related protocol parameters.
///
/// 与时间相关的协议参数。
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// The idle interval after which a keep-alive PING is emitted, and the
    /// service interval used when the send queue is empty.
    /// 发出保活PING的空闲间隔，也是发送队列为空时的服务间隔。
    pub action_timeout: Duration,

    /// The silence interval after which a peer is declared lost. Refreshed
    /// by every accepted packet.
    /// 对端被宣告丢失的静默间隔。每个被接受的包都会刷新它。
    pub drop_timeout: Duration,

    /// Upper bound for the retransmission timeout. Doubling backoff never
    /// exceeds this value, and it is also the initial RTO of a new peer.
    /// 重传超时的上限。指数退避不会超过该值，它也是新对端的初始RTO。
    pub max_rto: Duration,

    /// Initial smoothed round-trip time for a new peer. The initial RTT
    /// variance is half of this.
    /// 新对端的初始平滑往返时间。初始RTT方差为其一半。
    pub initial_srtt: Duration,
}

/// Socket and channel related parameters.
///
/// 套接字和通道相关参数。
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// The size of a receive buffer, and therefore the largest datagram the
    /// endpoint accepts. The maximum application payload is this minus the
    /// packet header size.
    /// 接收缓冲区的大小，也即端点接受的最大数据报。应用载荷的上限是该值
    /// 减去包头大小。
    pub recv_buffer_size: usize,

    /// How many receive buffers the buffer pool keeps cached.
    /// 缓冲池缓存的接收缓冲区数量上限。
    pub cached_buffers: usize,

    /// Capacity of the per-peer inbound packet / command channel.
    /// 每个对端的入站包/命令通道的容量。
    pub peer_channel_capacity: usize,

    /// Capacity of the application-facing event channel.
    /// 面向应用的事件通道的容量。
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_millis(5000),
            drop_timeout: Duration::from_millis(10000),
            max_rto: Duration::from_millis(3000),
            initial_srtt: Duration::from_millis(100),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 4096,
            cached_buffers: 10,
            peer_channel_capacity: 128,
            event_channel_capacity: 128,
        }
    }
}
