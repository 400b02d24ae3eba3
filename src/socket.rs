//! 协议栈与UDP套接字之间的接缝。
//! The seam between the protocol stack and the UDP socket.

use crate::error::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// A bound datagram transport.
///
/// The protocol owns one transport per socket and drives it from the server
/// actor, the client receive loop and the peer tasks. The production
/// implementation is [`tokio::net::UdpSocket`]; tests substitute
/// deterministic in-memory transports to fault-inject the I/O path.
///
/// 一个已绑定的数据报传输。
///
/// 协议栈每个套接字拥有一个传输实例，由服务端actor、客户端接收循环和
/// 对端任务驱动。生产实现是 [`tokio::net::UdpSocket`]；测试中则换成
/// 确定性的内存传输，以便对I/O路径注入故障。
#[async_trait]
pub trait UdpTransport: Send + Sync + Sized + 'static {
    /// Binds a fresh transport to `addr`.
    /// 将新的传输绑定到 `addr`。
    async fn bind(addr: SocketAddr) -> Result<Self>;

    /// Sends one datagram to `target` and returns the number of bytes
    /// written. Must not block beyond the socket readiness wait.
    /// 向 `target` 发送一个数据报并返回写入的字节数。除等待套接字就绪外
    /// 不得阻塞。
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> Result<usize>;

    /// Waits for the next datagram, copies it into `buf` and reports the
    /// source address.
    /// 等待下一个数据报，将其拷贝到 `buf` 并报告源地址。
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// The local address the transport is bound to.
    /// 传输绑定的本地地址。
    fn local_addr(&self) -> Result<SocketAddr>;
}

#[async_trait]
impl UdpTransport for UdpSocket {
    async fn bind(addr: SocketAddr) -> Result<Self> {
        Ok(UdpSocket::bind(addr).await?)
    }

    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> Result<usize> {
        Ok(UdpSocket::send_to(self, datagram, target).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(UdpSocket::recv_from(self, buf).await?)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(UdpSocket::local_addr(self)?)
    }
}

#[cfg(test)]
mod tests;
