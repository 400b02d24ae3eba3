//! 客户端：绑定单个对端的发起方外壳。
//! The client side: an initiator shell binding a single peer.

use crate::buffer::BufferPool;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::peer::endpoint::{PeerEndpoint, PeerInput};
use crate::peer::engine::{PeerEngine, PeerEvent};
use crate::peer::rtt::LinkInfo;
use crate::socket::UdpTransport;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{lookup_host, ToSocketAddrs, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// An event reported to the client application.
/// 上报给客户端应用的事件。
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The handshake completed; the client may send application packets.
    /// Reported exactly once per `connect`.
    /// 握手完成；客户端可以发送应用包。每次 `connect` 恰好上报一次。
    Connected,
    /// The server is gone: explicit close, refusal, or timeout. The shell
    /// is unbound afterwards and suitable for a fresh `connect`.
    /// 服务端已消失：显式关闭、拒绝或超时。此后外壳处于未绑定状态，
    /// 可以重新 `connect`。
    ServerLost,
    /// An in-sequence application packet from the server.
    /// 来自服务端的有序应用包。
    Packet { sub_command: u8, payload: Bytes },
    /// Updated link statistics.
    /// 更新后的链路统计。
    LinkInfo(LinkInfo),
}

/// The stream of [`ClientEvent`]s handed out by [`Client::connect`].
/// 由 [`Client::connect`] 交出的 [`ClientEvent`] 流。
pub struct ClientEvents {
    event_rx: mpsc::Receiver<(SocketAddr, PeerEvent)>,
}

impl ClientEvents {
    /// Waits for the next event. Returns `None` once the peer task is gone.
    /// 等待下一个事件。对端任务消失后返回 `None`。
    pub async fn next(&mut self) -> Option<ClientEvent> {
        let (_, event) = self.event_rx.recv().await?;
        Some(match event {
            PeerEvent::Connected => ClientEvent::Connected,
            PeerEvent::Dropped(_) => ClientEvent::ServerLost,
            PeerEvent::Packet {
                sub_command,
                payload,
            } => ClientEvent::Packet {
                sub_command,
                payload,
            },
            PeerEvent::LinkInfo(info) => ClientEvent::LinkInfo(info),
        })
    }
}

/// A handle to a client peer association.
///
/// `connect` resolves the target, binds an ephemeral local port in the
/// matching address family, sends the reliable connection request and
/// returns immediately; the handshake completes in the background and is
/// reported as [`ClientEvent::Connected`].
///
/// 客户端对端关联的句柄。
///
/// `connect` 解析目标地址，在匹配的地址族中绑定一个临时本地端口，发送
/// 可靠的连接请求并立即返回；握手在后台完成，并以
/// [`ClientEvent::Connected`] 上报。
pub struct Client {
    input_tx: mpsc::Sender<PeerInput>,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl Client {
    /// Connects to `target` with the default configuration.
    /// 使用默认配置连接到 `target`。
    pub async fn connect<T: ToSocketAddrs>(target: T) -> Result<(Client, ClientEvents)> {
        Self::connect_with_config(target, Config::default()).await
    }

    /// Connects to `target`.
    ///
    /// The target may be a hostname; the first resolved address is used.
    /// Resolution yielding no address at all is `AddressUnavailable`.
    ///
    /// 连接到 `target`。
    ///
    /// 目标可以是主机名；使用第一个解析出的地址。解析不出任何地址时返回
    /// `AddressUnavailable`。
    pub async fn connect_with_config<T: ToSocketAddrs>(
        target: T,
        config: Config,
    ) -> Result<(Client, ClientEvents)> {
        let remote_addr = lookup_host(target)
            .await?
            .next()
            .ok_or(Error::AddressUnavailable)?;

        // An ephemeral local port in the family of the target.
        let bind_addr: SocketAddr = if remote_addr.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let local_addr = UdpTransport::local_addr(socket.as_ref())?;

        let engine = PeerEngine::new_outgoing(remote_addr, config.clone(), Instant::now());

        let (input_tx, input_rx) = mpsc::channel(config.transport.peer_channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.transport.event_channel_capacity);

        let endpoint = PeerEndpoint::new(engine, socket.clone(), input_rx, event_tx, None);
        tokio::spawn(endpoint.run());
        tokio::spawn(recv_loop(socket, input_tx.clone(), config));

        info!(remote = %remote_addr, local = %local_addr, "connecting");
        Ok((
            Client {
                input_tx,
                remote_addr,
                local_addr,
            },
            ClientEvents { event_rx },
        ))
    }

    /// The address of the remote server.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The ephemeral local address the client is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends an application packet to the server.
    ///
    /// Fails with `NotConnected` until [`ClientEvent::Connected`] has been
    /// reported.
    ///
    /// 向服务端发送应用包。
    ///
    /// 在 [`ClientEvent::Connected`] 上报之前以 `NotConnected` 失败。
    pub async fn send(&self, reliable: bool, sub_command: u8, payload: Bytes) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.input_tx
            .send(PeerInput::Send {
                reliable,
                sub_command,
                payload,
                response: response_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        response_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Closes the association: one best-effort CLOSE datagram, then local
    /// teardown without waiting for an acknowledgement.
    /// 关闭关联：发送一个尽力而为的CLOSE数据报，然后本地拆除，不等待确认。
    pub async fn close(&self) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.input_tx
            .send(PeerInput::Close {
                response: response_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        response_rx.await.map_err(|_| Error::ChannelClosed)?
    }
}

/// Receives datagrams and feeds them to the peer task.
///
/// The source address is deliberately not compared against the server's:
/// any inbound datagram on the bound socket is handed to the single peer,
/// matching common UDP client practice and the wire behaviour of the
/// protocol.
///
/// 接收数据报并投喂给对端任务。
///
/// 刻意不将源地址与服务端地址比较：绑定套接字上的任何入站数据报都交给
/// 唯一的对端，符合常见的UDP客户端实践和协议的线上行为。
async fn recv_loop(
    socket: Arc<UdpSocket>,
    input_tx: mpsc::Sender<PeerInput>,
    config: Config,
) {
    let mut pool = BufferPool::new(
        config.transport.recv_buffer_size,
        config.transport.cached_buffers,
    );

    loop {
        let mut buf = pool.acquire();
        let (len, from) = match UdpTransport::recv_from(socket.as_ref(), &mut buf).await {
            Ok(received) => received,
            Err(err) => {
                warn!(%err, "socket receive error");
                pool.release(buf);
                continue;
            }
        };

        let packet = match Packet::decode(&buf[..len]) {
            Some(packet) => packet,
            None => {
                warn!(addr = %from, len, "malformed datagram, dropping");
                pool.release(buf);
                continue;
            }
        };
        pool.release(buf);

        if input_tx.send(PeerInput::Packet(packet)).await.is_err() {
            debug!("peer task gone, receive loop ending");
            return;
        }
    }
}
