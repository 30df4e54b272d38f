//! A minimal in-memory RadioStation server: enough to back the CLI's `rs`
//! subcommand and integration tests, not a production directory service
//! (its persistence and admin UI stay an external collaborator per §1).
//!
//! Grounded in the same actor-per-concern shape as
//! `siever_network::BroadcastWorker` and `siever_consensus::BlockManagerActor`.

use std::collections::HashMap;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use siever_network::rs_rpc::{ChannelInfo, ConnectStatus, PeerTarget, RsReply, RsRequest};
use siever_types::PeerEntry;
use tracing::info;
use uuid::Uuid;

pub type RsServerRef = ActorRef<RsServerMsg>;

pub enum RsServerMsg {
    Request(RsRequest, RpcReplyPort<RsReply>),
}

#[derive(Default)]
pub struct RsServer;

#[derive(Default)]
pub struct State {
    channels: HashMap<String, ChannelInfo>,
    /// Full peer records per channel, keyed the way `ConnectPeer` reports
    /// them. `peer_list_blob` (§6) is a `PeerManager::dump()`-compatible
    /// JSON encoding of this, distinct from `GetChannelInfos`'s lighter
    /// `PeerTarget`-only view.
    peer_registry: HashMap<String, Vec<PeerEntry>>,
    /// `GetRandomTable`'s backing seed, fixed at construction so every peer
    /// connecting to this RS instance derives the same controlled-test-network
    /// key material (§4.1).
    random_table: Vec<u8>,
}

impl RsServer {
    pub fn with_channels(channels: HashMap<String, ChannelInfo>) -> (Self, State) {
        (
            RsServer,
            State {
                channels,
                peer_registry: HashMap::new(),
                random_table: b"siever-test-network-seed".to_vec(),
            },
        )
    }
}

#[async_trait]
impl Actor for RsServer {
    type Msg = RsServerMsg;
    type State = State;
    type Arguments = State;

    async fn pre_start(&self, _myself: RsServerRef, args: State) -> Result<State, ActorProcessingErr> {
        Ok(args)
    }

    async fn handle(&self, _myself: RsServerRef, msg: RsServerMsg, state: &mut State) -> Result<(), ActorProcessingErr> {
        let RsServerMsg::Request(request, reply_port) = msg;
        let reply = handle_request(state, request);
        let _ = reply_port.send(reply);
        Ok(())
    }
}

fn handle_request(state: &mut State, request: RsRequest) -> RsReply {
    match request {
        RsRequest::GetChannelInfos { peer_id, peer_target, group_id } => {
            info!(%peer_id, %peer_target, %group_id, "peer requested channel infos");
            RsReply::ChannelInfos(state.channels.clone())
        }

        RsRequest::ConnectPeer { channel, peer_id, peer_target, group_id, cert } => {
            let Some(info) = state.channels.get_mut(&channel) else {
                return RsReply::Error(format!("unknown channel {channel}"));
            };
            if !info.peers.iter().any(|p| p.peer_target == peer_target) {
                info.peers.push(PeerTarget { peer_target: peer_target.clone() });
            }

            let registry = state.peer_registry.entry(channel.clone()).or_default();
            let order = registry.len() as u64;
            match registry.iter_mut().find(|p| p.peer_id == peer_id) {
                Some(existing) => {
                    existing.target = peer_target.clone();
                    existing.cert = cert;
                }
                None => registry.push(PeerEntry::new(peer_id, group_id.clone(), peer_target.clone(), cert, order)),
            }

            info!(%channel, %peer_id, %peer_target, %group_id, "peer connected");
            let peer_list_blob = serde_json::to_string(registry).unwrap_or_default();
            RsReply::ConnectPeer { status: ConnectStatus::Connected, peer_list_blob }
        }

        RsRequest::GetPeerList { channel } => match state.channels.get(&channel) {
            Some(info) => RsReply::PeerList(serde_json::to_string(&info.peers).unwrap_or_default()),
            None => RsReply::Error(format!("unknown channel {channel}")),
        },

        RsRequest::GetPeerStatus { channel, peer_id } => match state.channels.get(&channel) {
            Some(info) => {
                let known = info
                    .peers
                    .iter()
                    .any(|p| p.peer_target.contains(&peer_id.to_string()));
                RsReply::PeerStatus(if known { "connected".to_string() } else { "unknown".to_string() })
            }
            None => RsReply::Error(format!("unknown channel {channel}")),
        },

        RsRequest::GetRandomTable => RsReply::RandomTable(state.random_table.clone()),

        RsRequest::RsSendChannelManageInfo { manage_info_json } => {
            match serde_json::from_str::<HashMap<String, ChannelInfo>>(&manage_info_json) {
                Ok(channels) => {
                    state.channels = channels;
                    RsReply::Ack
                }
                Err(e) => RsReply::Error(format!("malformed manage info: {e}")),
            }
        }

        RsRequest::RsRestartChannel { channel } => {
            if state.channels.contains_key(&channel) {
                info!(%channel, "channel restart requested via RS admin op");
                RsReply::Ack
            } else {
                RsReply::Error(format!("unknown channel {channel}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_channels() -> HashMap<String, ChannelInfo> {
        let mut channels = HashMap::new();
        channels.insert(
            "chain1".to_string(),
            ChannelInfo { score_package: "hello".to_string(), peers: vec![] },
        );
        channels
    }

    #[tokio::test]
    async fn get_channel_infos_returns_seeded_map() {
        let (server, state) = RsServer::with_channels(sample_channels());
        let (actor, handle) = Actor::spawn(None, server, state).await.unwrap();

        let reply = ractor::call_t!(
            actor,
            RsServerMsg::Request,
            1000,
            RsRequest::GetChannelInfos {
                peer_id: Uuid::new_v4(),
                peer_target: "127.0.0.1:7100".to_string(),
                group_id: "default".to_string(),
            }
        )
        .unwrap();

        assert!(matches!(reply, RsReply::ChannelInfos(m) if m.contains_key("chain1")));

        actor.stop(None);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn connect_peer_to_unknown_channel_errors() {
        let (server, state) = RsServer::with_channels(sample_channels());
        let (actor, handle) = Actor::spawn(None, server, state).await.unwrap();

        let reply = ractor::call_t!(
            actor,
            RsServerMsg::Request,
            1000,
            RsRequest::ConnectPeer {
                channel: "nope".to_string(),
                peer_id: Uuid::new_v4(),
                peer_target: "127.0.0.1:7100".to_string(),
                group_id: "default".to_string(),
                cert: vec![],
            }
        )
        .unwrap();

        assert!(matches!(reply, RsReply::Error(_)));

        actor.stop(None);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn connect_peer_appends_to_channel_peer_list() {
        let (server, state) = RsServer::with_channels(sample_channels());
        let (actor, handle) = Actor::spawn(None, server, state).await.unwrap();

        let reply = ractor::call_t!(
            actor,
            RsServerMsg::Request,
            1000,
            RsRequest::ConnectPeer {
                channel: "chain1".to_string(),
                peer_id: Uuid::new_v4(),
                peer_target: "127.0.0.1:7100".to_string(),
                group_id: "default".to_string(),
                cert: vec![1, 2, 3],
            }
        )
        .unwrap();

        assert!(matches!(reply, RsReply::ConnectPeer { status: ConnectStatus::Connected, .. }));

        let list = ractor::call_t!(
            actor,
            RsServerMsg::Request,
            1000,
            RsRequest::GetPeerList { channel: "chain1".to_string() }
        )
        .unwrap();

        match list {
            RsReply::PeerList(blob) => assert!(blob.contains("127.0.0.1:7100")),
            other => panic!("unexpected reply {other:?}"),
        }

        actor.stop(None);
        let _ = handle.await;
    }
}
