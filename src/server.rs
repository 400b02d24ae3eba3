//! 服务端：接受多个对端的监听解复用器。
//! The server side: a listening demultiplexer accepting many peers.

use crate::buffer::BufferPool;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::{Packet, HEADER_SIZE};
use crate::peer::endpoint::{PeerEndpoint, PeerInput};
use crate::peer::engine::{PeerEngine, PeerEvent};
use crate::peer::rtt::LinkInfo;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::socket::UdpTransport;

/// An event reported to the server application. The peer is identified by
/// its remote address, the demultiplexing key.
///
/// 上报给服务端应用的事件。对端由其远端地址标识，即解复用键。
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A peer completed the handshake.
    /// 一个对端完成了握手。
    PeerNew { peer: SocketAddr },
    /// A peer was lost: remote close or timeout. Not reported for locally
    /// initiated closes.
    /// 一个对端丢失：远端关闭或超时。本地发起的关闭不会上报。
    PeerDropped { peer: SocketAddr },
    /// An in-sequence application packet from a peer.
    /// 来自某对端的有序应用包。
    Packet {
        peer: SocketAddr,
        sub_command: u8,
        payload: Bytes,
    },
    /// Updated link statistics for a peer.
    /// 某对端更新后的链路统计。
    LinkInfo { peer: SocketAddr, info: LinkInfo },
}

/// The stream of [`ServerEvent`]s handed out by [`Server::bind`].
/// 由 [`Server::bind`] 交出的 [`ServerEvent`] 流。
pub struct ServerEvents {
    event_rx: mpsc::Receiver<(SocketAddr, PeerEvent)>,
}

impl ServerEvents {
    /// Waits for the next event. Returns `None` once the server is gone.
    /// 等待下一个事件。服务端消失后返回 `None`。
    pub async fn next(&mut self) -> Option<ServerEvent> {
        let (peer, event) = self.event_rx.recv().await?;
        Some(match event {
            PeerEvent::Connected => ServerEvent::PeerNew { peer },
            PeerEvent::Dropped(_) => ServerEvent::PeerDropped { peer },
            PeerEvent::Packet {
                sub_command,
                payload,
            } => ServerEvent::Packet {
                peer,
                sub_command,
                payload,
            },
            PeerEvent::LinkInfo(info) => ServerEvent::LinkInfo { peer, info },
        })
    }
}

/// Commands sent to the server actor.
/// 发送给服务端actor的命令。
#[derive(Debug)]
enum ServerCommand {
    Send {
        peer: SocketAddr,
        reliable: bool,
        sub_command: u8,
        payload: Bytes,
        response: oneshot::Sender<Result<()>>,
    },
    Broadcast {
        reliable: bool,
        sub_command: u8,
        payload: Bytes,
        response: oneshot::Sender<Result<()>>,
    },
    ClosePeer {
        peer: SocketAddr,
        response: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        response: oneshot::Sender<Result<()>>,
    },
}

/// A handle to a listening server.
///
/// This is the main entry point for the accepting side. It is a lightweight
/// handle that sends commands to the central server actor task.
///
/// 监听服务端的句柄。
///
/// 这是接受方的主要入口点。它是一个轻量级句柄，把命令发送给中央服务端
/// actor任务处理。
pub struct Server {
    command_tx: mpsc::Sender<ServerCommand>,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds a server to the given address with the default configuration.
    /// 使用默认配置将服务端绑定到给定地址。
    pub async fn bind(addr: SocketAddr) -> Result<(Server, ServerEvents)> {
        Self::bind_with_config(addr, Config::default()).await
    }

    /// Binds a server to the given address.
    ///
    /// Spawns the central actor task owning the socket and the peer table,
    /// and returns a handle plus the event stream.
    ///
    /// 将服务端绑定到给定地址。
    ///
    /// 生成拥有套接字和对端表的中央actor任务，并返回句柄和事件流。
    pub async fn bind_with_config(
        addr: SocketAddr,
        config: Config,
    ) -> Result<(Server, ServerEvents)> {
        Self::bind_on::<UdpSocket>(addr, config).await
    }

    /// Binds a server on a custom transport implementation.
    /// 在自定义传输实现上绑定服务端。
    pub async fn bind_on<S: UdpTransport>(
        addr: SocketAddr,
        config: Config,
    ) -> Result<(Server, ServerEvents)> {
        let socket = Arc::new(S::bind(addr).await?);
        let local_addr = socket.local_addr()?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (event_tx, event_rx) = mpsc::channel(config.transport.event_channel_capacity);
        let (closed_tx, closed_rx) = mpsc::channel(128);

        let pool = BufferPool::new(
            config.transport.recv_buffer_size,
            config.transport.cached_buffers,
        );

        let mut actor = ServerActor {
            socket,
            config,
            peers: HashMap::new(),
            command_rx,
            closed_tx,
            closed_rx,
            event_tx,
            pool,
        };

        info!(addr = %local_addr, "server bound and running");
        tokio::spawn(async move { actor.run().await });

        Ok((
            Server {
                command_tx,
                local_addr,
            },
            ServerEvents { event_rx },
        ))
    }

    /// The local address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends an application packet to a connected peer.
    ///
    /// `sub_command` is the application-visible command sub-code. The call
    /// completes once the packet is queued on the peer.
    ///
    /// 向一个已连接的对端发送应用包。
    ///
    /// `sub_command` 是应用可见的命令子码。当包在对端入队后调用即完成。
    pub async fn send(
        &self,
        peer: SocketAddr,
        reliable: bool,
        sub_command: u8,
        payload: Bytes,
    ) -> Result<()> {
        self.request(|response| ServerCommand::Send {
            peer,
            reliable,
            sub_command,
            payload,
            response,
        })
        .await
    }

    /// Sends an application packet to every connected peer. Per-peer
    /// failures are not reported.
    /// 向每个已连接的对端发送应用包。不报告单个对端的失败。
    pub async fn broadcast(&self, reliable: bool, sub_command: u8, payload: Bytes) -> Result<()> {
        self.request(|response| ServerCommand::Broadcast {
            reliable,
            sub_command,
            payload,
            response,
        })
        .await
    }

    /// Closes one peer: a single best-effort CLOSE datagram, then teardown.
    /// No `PeerDropped` event is reported for a local close.
    /// 关闭一个对端：发送一个尽力而为的CLOSE数据报后拆除。本地关闭不上报
    /// `PeerDropped` 事件。
    pub async fn close_peer(&self, peer: SocketAddr) -> Result<()> {
        self.request(|response| ServerCommand::ClosePeer { peer, response })
            .await
    }

    /// Shuts the server down, closing every peer and releasing the socket.
    /// 关闭服务端，关闭每个对端并释放套接字。
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|response| ServerCommand::Shutdown { response })
            .await
    }

    async fn request<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> ServerCommand,
    {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(make(response_tx))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        response_rx.await.map_err(|_| Error::ChannelClosed)?
    }
}

/// The actor that owns the UDP socket and the peer table.
///
/// It receives every datagram, routes it to the owning peer task by source
/// address, and constructs a fresh peer on a well-formed connection request
/// from an unknown source.
///
/// 拥有UDP套接字和对端表的actor。
///
/// 它接收每个数据报，按源地址路由给所属的对端任务，并在收到来自未知源的
/// 格式良好的连接请求时构建新对端。
struct ServerActor<S: UdpTransport> {
    socket: Arc<S>,
    config: Config,
    peers: HashMap<SocketAddr, mpsc::Sender<PeerInput>>,
    command_rx: mpsc::Receiver<ServerCommand>,
    /// Peer tasks report their address here when they terminate.
    /// 对端任务终止时向这里报告其地址。
    closed_tx: mpsc::Sender<SocketAddr>,
    closed_rx: mpsc::Receiver<SocketAddr>,
    event_tx: mpsc::Sender<(SocketAddr, PeerEvent)>,
    pool: BufferPool,
}

impl<S: UdpTransport> ServerActor<S> {
    async fn run(&mut self) {
        loop {
            let mut buf = self.pool.acquire();

            tokio::select! {
                biased;

                command = self.command_rx.recv() => {
                    self.pool.release(buf);
                    match command {
                        Some(command) => {
                            if self.handle_command(command).await {
                                break;
                            }
                        }
                        None => {
                            // Every handle is gone; close all peers and stop.
                            debug!("server handle dropped, shutting down");
                            self.close_all_peers().await;
                            break;
                        }
                    }
                }

                Some(addr) = self.closed_rx.recv() => {
                    self.pool.release(buf);
                    debug!(addr = %addr, "peer task ended, forgetting association");
                    self.peers.remove(&addr);
                }

                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            self.handle_datagram(&buf[..len], addr).await;
                            self.pool.release(buf);
                        }
                        Err(err) => {
                            self.pool.release(buf);
                            error!(%err, "socket receive error");
                        }
                    }
                }
            }
        }
        debug!("server actor terminated");
    }

    /// Returns true when the actor should stop.
    async fn handle_command(&mut self, command: ServerCommand) -> bool {
        match command {
            ServerCommand::Send {
                peer,
                reliable,
                sub_command,
                payload,
                response,
            } => {
                match self.peers.get(&peer) {
                    Some(input_tx) => {
                        let forwarded = input_tx
                            .send(PeerInput::Send {
                                reliable,
                                sub_command,
                                payload,
                                response,
                            })
                            .await;
                        if let Err(mpsc::error::SendError(PeerInput::Send { response, .. })) =
                            forwarded
                        {
                            let _ = response.send(Err(Error::NotConnected));
                        }
                    }
                    None => {
                        let _ = response.send(Err(Error::NotConnected));
                    }
                }
            }

            ServerCommand::Broadcast {
                reliable,
                sub_command,
                payload,
                response,
            } => {
                for input_tx in self.peers.values() {
                    let (peer_response, _) = oneshot::channel();
                    let _ = input_tx
                        .send(PeerInput::Send {
                            reliable,
                            sub_command,
                            payload: payload.clone(),
                            response: peer_response,
                        })
                        .await;
                }
                let _ = response.send(Ok(()));
            }

            ServerCommand::ClosePeer { peer, response } => match self.peers.remove(&peer) {
                Some(input_tx) => {
                    let _ = input_tx.send(PeerInput::Close { response }).await;
                }
                None => {
                    let _ = response.send(Err(Error::NotConnected));
                }
            },

            ServerCommand::Shutdown { response } => {
                self.close_all_peers().await;
                let _ = response.send(Ok(()));
                return true;
            }
        }
        false
    }

    /// Closes every peer and reports the drops, in the manner of a full
    /// server teardown.
    /// 关闭每个对端并上报丢弃，即完整的服务端拆除。
    async fn close_all_peers(&mut self) {
        for (addr, input_tx) in self.peers.drain() {
            let (peer_response, _) = oneshot::channel();
            let _ = input_tx
                .send(PeerInput::Close {
                    response: peer_response,
                })
                .await;
            let _ = self
                .event_tx
                .send((addr, PeerEvent::Dropped(crate::peer::DropReason::Closed)))
                .await;
        }
    }

    /// Routes one inbound datagram.
    ///
    /// A known source goes straight to its peer task. An unknown source must
    /// present exactly a well-formed connection request; anything else is
    /// garbage and is dropped after a log line.
    ///
    /// 路由一个入站数据报。
    ///
    /// 已知源直接交给其对端任务。未知源必须恰好呈现一个格式良好的连接
    /// 请求；其他任何内容都是垃圾，记录日志后丢弃。
    async fn handle_datagram(&mut self, datagram: &[u8], addr: SocketAddr) {
        let packet = match Packet::decode(datagram) {
            Some(packet) => packet,
            None => {
                warn!(addr = %addr, len = datagram.len(), "malformed datagram, dropping");
                return;
            }
        };

        if let Some(input_tx) = self.peers.get(&addr) {
            if input_tx.send(PeerInput::Packet(packet)).await.is_err() {
                debug!(addr = %addr, "peer task died, removing association");
                self.peers.remove(&addr);
            }
            return;
        }

        if !matches!(packet, Packet::ConnReq { .. }) || datagram.len() != HEADER_SIZE + 4 {
            debug!(addr = %addr, "garbage data from unknown source");
            return;
        }

        info!(addr = %addr, "new connection attempt");
        let engine = PeerEngine::new_incoming(addr, self.config.clone(), Instant::now());
        let (input_tx, input_rx) = mpsc::channel(self.config.transport.peer_channel_capacity);
        let endpoint = PeerEndpoint::new(
            engine,
            self.socket.clone(),
            input_rx,
            self.event_tx.clone(),
            Some(self.closed_tx.clone()),
        );
        tokio::spawn(endpoint.run());

        if input_tx.send(PeerInput::Packet(packet)).await.is_err() {
            warn!(addr = %addr, "failed to hand initial packet to new peer task");
            return;
        }
        self.peers.insert(addr, input_tx);
    }
}
