//! 每对端协议引擎：握手、序号、重传、保活与存活检测。
//! The per-peer protocol engine: handshake, sequencing, retransmission,
//! keep-alive and liveness detection.
//!
//! [`engine::PeerEngine`] is a pure, synchronous state machine; the async
//! glue that feeds it datagrams and drives its service timer lives in
//! [`endpoint`].
//!
//! [`engine::PeerEngine`] 是一个纯同步状态机；向它投喂数据报并驱动其服务
//! 定时器的异步胶水代码位于 [`endpoint`] 中。

pub(crate) mod endpoint;
pub mod engine;
pub mod rtt;
pub(crate) mod send_queue;
pub mod seq;

pub use engine::{DropReason, PeerEngine, PeerEvent, PeerState};
pub use rtt::LinkInfo;
