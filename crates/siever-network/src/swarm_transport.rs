//! Drives a single `libp2p` swarm in a background task and exposes it to
//! the rest of the node as a [`Transport`] plus a stream of inbound
//! requests to answer. This is the one place in the workspace that touches
//! `libp2p` directly; everything above this module (BroadcastWorker,
//! BlockManager, RsClient) only sees [`Transport`] and the typed
//! request/reply enums.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::request_response::{self, ResponseChannel};
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{ConnectionId, SwarmEvent};
use libp2p::{identity::Keypair, noise, tcp, yamux, Multiaddr, PeerId, Swarm};
use siever_types::{SievError, SievResult};
use tokio::sync::{mpsc, oneshot};

use crate::behaviour::{Behaviour, BehaviourEvent};
use crate::rpc::{RpcReply, RpcRequest};
use crate::rs_rpc::{RsReply, RsRequest};
use crate::transport::{RsTransport, Transport};

/// An inbound call awaiting a reply. Dropping this without calling
/// [`InboundRpc::reply`] simply lets the peer's request time out.
pub struct InboundRpc {
    pub from: PeerId,
    pub request: RpcRequest,
    channel: ResponseChannel<RpcReply>,
    reply_tx: mpsc::UnboundedSender<SwarmCommand>,
}

impl InboundRpc {
    pub fn reply(self, reply: RpcReply) {
        let _ = self.reply_tx.send(SwarmCommand::RespondRpc { channel: self.channel, reply });
    }
}

pub struct InboundRs {
    pub from: PeerId,
    pub request: RsRequest,
    channel: ResponseChannel<RsReply>,
    reply_tx: mpsc::UnboundedSender<SwarmCommand>,
}

impl InboundRs {
    pub fn reply(self, reply: RsReply) {
        let _ = self.reply_tx.send(SwarmCommand::RespondRs { channel: self.channel, reply });
    }
}

enum SwarmCommand {
    SendRpc {
        target: String,
        request: RpcRequest,
        resp: oneshot::Sender<SievResult<RpcReply>>,
    },
    SendRs {
        target: String,
        request: RsRequest,
        resp: oneshot::Sender<SievResult<RsReply>>,
    },
    RespondRpc { channel: ResponseChannel<RpcReply>, reply: RpcReply },
    RespondRs { channel: ResponseChannel<RsReply>, reply: RsReply },
}

/// A send queued behind a dial that hasn't resolved into a connection yet.
enum PendingSend {
    Rpc { request: RpcRequest, resp: oneshot::Sender<SievResult<RpcReply>> },
    Rs { request: RsRequest, resp: oneshot::Sender<SievResult<RsReply>> },
}

/// Parses the plain `"host:port"` strings used throughout the workspace
/// (`PeerEntry::target`, `RsConfig::targets`, ...) into a dialable TCP
/// `Multiaddr`. No `/p2p/<peerid>` component is required or expected: the
/// remote's `PeerId` is learned from the Noise handshake once connected,
/// not known up front.
pub fn multiaddr_from_target(target: &str) -> SievResult<Multiaddr> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| SievError::SchemaInvalid(format!("target {target} is not host:port")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| SievError::SchemaInvalid(format!("target {target} has a non-numeric port")))?;

    let mut addr = if let Ok(ipv6) = host.parse::<std::net::Ipv6Addr>() {
        Multiaddr::empty().with(libp2p::multiaddr::Protocol::Ip6(ipv6))
    } else if let Ok(ipv4) = host.parse::<std::net::Ipv4Addr>() {
        Multiaddr::empty().with(libp2p::multiaddr::Protocol::Ip4(ipv4))
    } else {
        Multiaddr::empty().with(libp2p::multiaddr::Protocol::Dns(host.into()))
    };
    addr.push(libp2p::multiaddr::Protocol::Tcp(port));
    Ok(addr)
}

/// A `Transport` backed by a live `libp2p` swarm running on its own task.
pub struct SwarmTransport {
    cmd_tx: mpsc::UnboundedSender<SwarmCommand>,
}

impl SwarmTransport {
    /// Spawns the swarm driver task and returns the transport handle plus
    /// the two inbound-request streams (one per protocol) for the owning
    /// `ChannelRuntime`/`NodeService` to consume.
    pub fn spawn(
        keypair: Keypair,
        listen_addr: Multiaddr,
    ) -> SievResult<(Self, mpsc::UnboundedReceiver<InboundRpc>, mpsc::UnboundedReceiver<InboundRs>)> {
        let local_public_key = keypair.public();

        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(tcp::Config::default(), noise::Config::new, yamux::Config::default)
            .map_err(|e| SievError::TransportUnreachable(e.to_string()))?
            .with_behaviour(|_| Behaviour::new(local_public_key))
            .map_err(|e| SievError::TransportUnreachable(e.to_string()))?
            .build();

        swarm
            .listen_on(listen_addr)
            .map_err(|e| SievError::TransportUnreachable(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (rpc_in_tx, rpc_in_rx) = mpsc::unbounded_channel();
        let (rs_in_tx, rs_in_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_driver(swarm, cmd_rx, cmd_tx.clone(), rpc_in_tx, rs_in_tx));

        Ok((SwarmTransport { cmd_tx }, rpc_in_rx, rs_in_rx))
    }

    pub async fn send_rs(&self, target: &str, request: RsRequest, timeout: Duration) -> SievResult<RsReply> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(SwarmCommand::SendRs { target: target.to_string(), request, resp: resp_tx })
            .map_err(|_| SievError::TransportUnreachable("swarm driver gone".to_string()))?;

        tokio::time::timeout(timeout, resp_rx)
            .await
            .map_err(|_| SievError::TransportTimeout)?
            .map_err(|_| SievError::TransportUnreachable("swarm driver dropped reply".to_string()))?
    }
}

#[async_trait]
impl Transport for SwarmTransport {
    async fn send(&self, target: &str, request: RpcRequest, timeout: Duration) -> SievResult<RpcReply> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(SwarmCommand::SendRpc { target: target.to_string(), request, resp: resp_tx })
            .map_err(|_| SievError::TransportUnreachable("swarm driver gone".to_string()))?;

        tokio::time::timeout(timeout, resp_rx)
            .await
            .map_err(|_| SievError::TransportTimeout)?
            .map_err(|_| SievError::TransportUnreachable("swarm driver dropped reply".to_string()))?
    }
}

#[async_trait]
impl RsTransport for SwarmTransport {
    async fn send(&self, target: &str, request: RsRequest, timeout: Duration) -> SievResult<RsReply> {
        self.send_rs(target, request, timeout).await
    }
}

async fn run_driver(
    mut swarm: Swarm<Behaviour>,
    mut cmd_rx: mpsc::UnboundedReceiver<SwarmCommand>,
    cmd_tx: mpsc::UnboundedSender<SwarmCommand>,
    rpc_in_tx: mpsc::UnboundedSender<InboundRpc>,
    rs_in_tx: mpsc::UnboundedSender<InboundRs>,
) {
    let mut peers_by_target: HashMap<String, PeerId> = HashMap::new();
    let mut pending_rpc: HashMap<request_response::OutboundRequestId, oneshot::Sender<SievResult<RpcReply>>> =
        HashMap::new();
    let mut pending_rs: HashMap<request_response::OutboundRequestId, oneshot::Sender<SievResult<RsReply>>> =
        HashMap::new();
    // Dials in flight, keyed by the `ConnectionId` libp2p assigns when we
    // build the `DialOpts` ourselves (rather than letting `swarm.dial`
    // generate one we'd have no way to correlate back to `target`).
    let mut pending_connects: HashMap<ConnectionId, (String, Vec<PendingSend>)> = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = cmd_rx.recv() => match cmd {
                SwarmCommand::SendRpc { target, request, resp } => {
                    if let Some(peer_id) = peers_by_target.get(&target).copied() {
                        let id = swarm.behaviour_mut().send_rpc_request(&peer_id, request);
                        pending_rpc.insert(id, resp);
                    } else {
                        queue_or_dial(
                            &mut swarm,
                            &mut pending_connects,
                            target,
                            PendingSend::Rpc { request, resp },
                        );
                    }
                }
                SwarmCommand::SendRs { target, request, resp } => {
                    if let Some(peer_id) = peers_by_target.get(&target).copied() {
                        let id = swarm.behaviour_mut().send_rs_request(&peer_id, request);
                        pending_rs.insert(id, resp);
                    } else {
                        queue_or_dial(
                            &mut swarm,
                            &mut pending_connects,
                            target,
                            PendingSend::Rs { request, resp },
                        );
                    }
                }
                SwarmCommand::RespondRpc { channel, reply } => {
                    let _ = swarm.behaviour_mut().send_rpc_response(channel, reply);
                }
                SwarmCommand::RespondRs { channel, reply } => {
                    let _ = swarm.behaviour_mut().send_rs_response(channel, reply);
                }
            },

            event = swarm.select_next_some() => match event {
                SwarmEvent::Behaviour(event) => {
                    handle_behaviour_event(
                        event,
                        &mut pending_rpc,
                        &mut pending_rs,
                        &rpc_in_tx,
                        &rs_in_tx,
                        &cmd_tx,
                    );
                }
                SwarmEvent::ConnectionEstablished { connection_id, peer_id, .. } => {
                    if let Some((target, sends)) = pending_connects.remove(&connection_id) {
                        peers_by_target.insert(target, peer_id);
                        for send in sends {
                            dispatch_pending(&mut swarm, &peer_id, send, &mut pending_rpc, &mut pending_rs);
                        }
                    }
                }
                SwarmEvent::OutgoingConnectionError { connection_id, error, .. } => {
                    if let Some((target, sends)) = pending_connects.remove(&connection_id) {
                        tracing::warn!(%target, %error, "dial failed");
                        for send in sends {
                            fail_pending(send, SievError::TransportUnreachable(error.to_string()));
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

fn queue_or_dial(
    swarm: &mut Swarm<Behaviour>,
    pending_connects: &mut HashMap<ConnectionId, (String, Vec<PendingSend>)>,
    target: String,
    send: PendingSend,
) {
    if let Some((_, sends)) = pending_connects.values_mut().find(|(t, _)| *t == target) {
        sends.push(send);
        return;
    }

    let addr = match multiaddr_from_target(&target) {
        Ok(addr) => addr,
        Err(e) => {
            fail_pending(send, e);
            return;
        }
    };

    let opts = DialOpts::unknown_peer_id().address(addr).build();
    let connection_id = opts.connection_id();
    match swarm.dial(opts) {
        Ok(()) => {
            pending_connects.insert(connection_id, (target, vec![send]));
        }
        Err(e) => fail_pending(send, SievError::TransportUnreachable(e.to_string())),
    }
}

fn dispatch_pending(
    swarm: &mut Swarm<Behaviour>,
    peer_id: &PeerId,
    send: PendingSend,
    pending_rpc: &mut HashMap<request_response::OutboundRequestId, oneshot::Sender<SievResult<RpcReply>>>,
    pending_rs: &mut HashMap<request_response::OutboundRequestId, oneshot::Sender<SievResult<RsReply>>>,
) {
    match send {
        PendingSend::Rpc { request, resp } => {
            let id = swarm.behaviour_mut().send_rpc_request(peer_id, request);
            pending_rpc.insert(id, resp);
        }
        PendingSend::Rs { request, resp } => {
            let id = swarm.behaviour_mut().send_rs_request(peer_id, request);
            pending_rs.insert(id, resp);
        }
    }
}

fn fail_pending(send: PendingSend, err: SievError) {
    match send {
        PendingSend::Rpc { resp, .. } => {
            let _ = resp.send(Err(err));
        }
        PendingSend::Rs { resp, .. } => {
            let _ = resp.send(Err(err));
        }
    }
}

fn handle_behaviour_event(
    event: BehaviourEvent,
    pending_rpc: &mut HashMap<request_response::OutboundRequestId, oneshot::Sender<SievResult<RpcReply>>>,
    pending_rs: &mut HashMap<request_response::OutboundRequestId, oneshot::Sender<SievResult<RsReply>>>,
    rpc_in_tx: &mpsc::UnboundedSender<InboundRpc>,
    rs_in_tx: &mpsc::UnboundedSender<InboundRs>,
    cmd_tx: &mpsc::UnboundedSender<SwarmCommand>,
) {
    match event {
        BehaviourEvent::Rpc(request_response::Event::Message { peer, message, .. }) => match message {
            request_response::Message::Request { request, channel, .. } => {
                let _ = rpc_in_tx.send(InboundRpc { from: peer, request, channel, reply_tx: cmd_tx.clone() });
            }
            request_response::Message::Response { request_id, response } => {
                if let Some(resp) = pending_rpc.remove(&request_id) {
                    let _ = resp.send(Ok(response));
                }
            }
        },
        BehaviourEvent::Rpc(request_response::Event::OutboundFailure { request_id, error, .. }) => {
            if let Some(resp) = pending_rpc.remove(&request_id) {
                let _ = resp.send(Err(SievError::TransportUnreachable(error.to_string())));
            }
        }
        BehaviourEvent::Rs(request_response::Event::Message { peer, message, .. }) => match message {
            request_response::Message::Request { request, channel, .. } => {
                let _ = rs_in_tx.send(InboundRs { from: peer, request, channel, reply_tx: cmd_tx.clone() });
            }
            request_response::Message::Response { request_id, response } => {
                if let Some(resp) = pending_rs.remove(&request_id) {
                    let _ = resp.send(Ok(response));
                }
            }
        },
        BehaviourEvent::Rs(request_response::Event::OutboundFailure { request_id, error, .. }) => {
            if let Some(resp) = pending_rs.remove(&request_id) {
                let _ = resp.send(Err(SievError::TransportUnreachable(error.to_string())));
            }
        }
        _ => {}
    }
}
