//! 每对端的异步任务：驱动引擎、发送数据报并上报事件。
//! The per-peer async task: drives the engine, transmits datagrams and
//! reports events upward.

use crate::error::Result;
use crate::packet::Packet;
use crate::peer::engine::{PeerEngine, PeerEvent, PeerState};
use crate::socket::UdpTransport;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Everything that can be fed into a peer task: inbound packets from the
/// demultiplexer and commands from the application handle.
///
/// 可以投喂给对端任务的一切：来自解复用器的入站包和来自应用句柄的命令。
#[derive(Debug)]
pub(crate) enum PeerInput {
    /// A decoded datagram from the socket.
    /// 来自套接字的已解码数据报。
    Packet(Packet),
    /// Queue an application packet.
    /// 将一个应用包入队。
    Send {
        reliable: bool,
        sub_command: u8,
        payload: Bytes,
        response: oneshot::Sender<Result<()>>,
    },
    /// Close the association locally: one best-effort CLOSE datagram, then
    /// teardown without waiting.
    /// 本地关闭关联：发送一个尽力而为的CLOSE数据报，然后不等待直接拆除。
    Close {
        response: oneshot::Sender<Result<()>>,
    },
}

/// The per-peer endpoint task.
///
/// Owns the engine and serializes everything that touches it: inbound
/// packets, user commands and the service timer, exactly one stimulus at a
/// time. The service routine runs only when the engine's own wake deadline
/// is reached, never as a side effect of an inbound packet.
///
/// 每对端的端点任务。
///
/// 拥有引擎并串行化所有触及它的事件：入站包、用户命令和服务定时器，每次
/// 恰好一个激励。服务例程只在引擎自己的唤醒截止时间到达时运行，绝不作为
/// 入站包的副作用运行。
pub(crate) struct PeerEndpoint<S: UdpTransport> {
    remote_addr: SocketAddr,
    engine: PeerEngine,
    socket: Arc<S>,
    input_rx: mpsc::Receiver<PeerInput>,
    event_tx: mpsc::Sender<(SocketAddr, PeerEvent)>,
    /// Notified with our address when the task terminates, so the owner can
    /// forget the association. `None` for the client, which owns one peer.
    /// 任务终止时用我方地址通知，让所有者忘记该关联。客户端只拥有一个
    /// 对端，为 `None`。
    closed_tx: Option<mpsc::Sender<SocketAddr>>,
}

impl<S: UdpTransport> PeerEndpoint<S> {
    pub(crate) fn new(
        engine: PeerEngine,
        socket: Arc<S>,
        input_rx: mpsc::Receiver<PeerInput>,
        event_tx: mpsc::Sender<(SocketAddr, PeerEvent)>,
        closed_tx: Option<mpsc::Sender<SocketAddr>>,
    ) -> Self {
        Self {
            remote_addr: engine.remote_addr(),
            engine,
            socket,
            input_rx,
            event_tx,
            closed_tx,
        }
    }

    /// Runs the endpoint until the association dies.
    /// 运行端点直到关联终结。
    pub(crate) async fn run(mut self) {
        debug!(addr = %self.remote_addr, state = ?self.engine.state(), "peer task started");

        loop {
            let wake = self.engine.next_wake(Instant::now());

            tokio::select! {
                biased;

                input = self.input_rx.recv() => {
                    let now = Instant::now();
                    match input {
                        Some(input) => self.handle_input(input, now).await,
                        None => {
                            // Every handle is gone; close the association
                            // the same way an explicit local close would.
                            debug!(addr = %self.remote_addr, "all handles dropped, closing");
                            let datagram = self.engine.close();
                            self.transmit(datagram).await;
                        }
                    }
                }

                _ = tokio::time::sleep_until(wake) => {
                    self.service(Instant::now()).await;
                }
            }

            if self.engine.is_dead() {
                break;
            }
        }

        if let Some(closed_tx) = &self.closed_tx {
            let _ = closed_tx.send(self.remote_addr).await;
        }
        debug!(addr = %self.remote_addr, "peer task terminated");
    }

    async fn handle_input(&mut self, input: PeerInput, now: Instant) {
        match input {
            PeerInput::Packet(packet) => {
                let mut events = Vec::new();
                if let Err(err) = self.engine.handle_packet(packet, now, &mut events) {
                    warn!(addr = %self.remote_addr, %err, "packet rejected");
                    // A fresh server-side peer whose handshake packet was
                    // rejected is removed instead of lingering until the
                    // drop deadline.
                    if self.engine.state() == PeerState::New {
                        self.engine.abort();
                    }
                }
                self.publish(events).await;
            }
            PeerInput::Send {
                reliable,
                sub_command,
                payload,
                response,
            } => {
                let result = if self.engine.state() == PeerState::Run {
                    self.engine.send_app(reliable, sub_command, payload)
                } else {
                    Err(crate::error::Error::NotConnected)
                };
                let _ = response.send(result);
            }
            PeerInput::Close { response } => {
                let datagram = self.engine.close();
                self.transmit(datagram).await;
                let _ = response.send(Ok(()));
            }
        }
    }

    /// One service cycle: let the engine decide what to send, then put the
    /// datagrams on the wire in order.
    /// 一次服务周期：由引擎决定发送什么，然后按序将数据报放到线上。
    async fn service(&mut self, now: Instant) {
        let mut out = Vec::new();
        let mut events = Vec::new();
        self.engine.service(now, &mut out, &mut events);
        for datagram in out {
            self.transmit(datagram).await;
        }
        self.publish(events).await;
    }

    async fn transmit(&mut self, datagram: Bytes) {
        trace!(addr = %self.remote_addr, bytes = datagram.len(), "sending datagram");
        match self.socket.send_to(&datagram, self.remote_addr).await {
            Ok(_) => self.engine.record_send_result(Ok(())),
            Err(err) => {
                warn!(addr = %self.remote_addr, %err, "send_to failed");
                let kind = std::io::Error::from(err).kind();
                self.engine.record_send_result(Err(kind));
            }
        }
    }

    async fn publish(&self, events: Vec<PeerEvent>) {
        for event in events {
            if self
                .event_tx
                .send((self.remote_addr, event))
                .await
                .is_err()
            {
                trace!(addr = %self.remote_addr, "event receiver dropped");
                return;
            }
        }
    }
}
