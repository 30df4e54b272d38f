use libp2p::request_response::{self, OutboundRequestId, ProtocolSupport, ResponseChannel};
use libp2p::swarm::NetworkBehaviour;
use libp2p::{identify, ping, StreamProtocol};

pub use libp2p::{Multiaddr, PeerId};

use crate::rpc::{RpcReply, RpcRequest};
use crate::rs_rpc::{RsReply, RsRequest};

pub const RPC_PROTOCOL: StreamProtocol = StreamProtocol::new("/siever/rpc/1.0.0");
pub const RS_PROTOCOL: StreamProtocol = StreamProtocol::new("/siever/rs/1.0.0");

pub type RpcBehaviour = request_response::cbor::Behaviour<RpcRequest, RpcReply>;
pub type RsBehaviour = request_response::cbor::Behaviour<RsRequest, RsReply>;

#[derive(Debug)]
pub enum NetworkEvent {
    Identify(identify::Event),
    Ping(ping::Event),
    Rpc(request_response::Event<RpcRequest, RpcReply>),
    Rs(request_response::Event<RsRequest, RsReply>),
}

impl From<identify::Event> for NetworkEvent {
    fn from(event: identify::Event) -> Self {
        Self::Identify(event)
    }
}

impl From<ping::Event> for NetworkEvent {
    fn from(event: ping::Event) -> Self {
        Self::Ping(event)
    }
}

impl From<request_response::Event<RpcRequest, RpcReply>> for NetworkEvent {
    fn from(event: request_response::Event<RpcRequest, RpcReply>) -> Self {
        Self::Rpc(event)
    }
}

impl From<request_response::Event<RsRequest, RsReply>> for NetworkEvent {
    fn from(event: request_response::Event<RsRequest, RsReply>) -> Self {
        Self::Rs(event)
    }
}

/// Combined swarm behaviour: liveness (`identify`/`ping`) plus the two
/// framed request/reply protocols named in §6 — the peer-to-peer RPC
/// surface and the directory-service RPC surface, kept on separate
/// protocol names so they can version independently.
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "NetworkEvent")]
pub struct Behaviour {
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
    pub rpc: RpcBehaviour,
    pub rs: RsBehaviour,
}

impl Behaviour {
    pub fn new(local_public_key: libp2p::identity::PublicKey) -> Self {
        let identify = identify::Behaviour::new(identify::Config::new(
            "/siever/id/1.0.0".to_string(),
            local_public_key,
        ));
        let ping = ping::Behaviour::new(ping::Config::new());
        let rpc = RpcBehaviour::new([(RPC_PROTOCOL, ProtocolSupport::Full)], request_response::Config::default());
        let rs = RsBehaviour::new([(RS_PROTOCOL, ProtocolSupport::Full)], request_response::Config::default());

        Behaviour { identify, ping, rpc, rs }
    }

    pub fn send_rpc_request(&mut self, peer: &PeerId, request: RpcRequest) -> OutboundRequestId {
        self.rpc.send_request(peer, request)
    }

    pub fn send_rpc_response(
        &mut self,
        channel: ResponseChannel<RpcReply>,
        reply: RpcReply,
    ) -> Result<(), RpcReply> {
        self.rpc.send_response(channel, reply)
    }

    pub fn send_rs_request(&mut self, peer: &PeerId, request: RsRequest) -> OutboundRequestId {
        self.rs.send_request(peer, request)
    }

    pub fn send_rs_response(
        &mut self,
        channel: ResponseChannel<RsReply>,
        reply: RsReply,
    ) -> Result<(), RsReply> {
        self.rs.send_response(channel, reply)
    }
}
