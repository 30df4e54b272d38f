//! End-to-end scenarios driven entirely in-process: a loopback [`Transport`]
//! dispatches straight into the target [`NodeService`] via
//! [`siever_engine::dispatch`] instead of a real swarm, so these exercise the
//! full boot/propose/vote/commit path without any actual networking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use siever_config::{Config, NetworkConfig, StorageConfig};
use siever_crypto::{SeedDerivedSigner, Signer};
use siever_engine::NodeService;
use siever_network::rpc::{RpcReply, RpcRequest};
use siever_network::rs_rpc::{ChannelInfo, ConnectStatus, PeerTarget, RsReply, RsRequest};
use siever_network::{RsTransport, Transport};
use siever_rs::RsClient;
use siever_types::{PeerEntry, PeerStatus, SievError, SievResult};
use uuid::Uuid;

const CHANNEL: &str = "chain1";

/// Fixed membership known in advance: a real RS learns this from
/// `ConnectPeer` calls over time, but these scenarios pre-seed it so the
/// scripted boot sequence only needs one `GetChannelInfos`/`ConnectPeer`
/// round trip per node.
struct FakeRs {
    peers: Vec<PeerEntry>,
}

#[async_trait]
impl RsTransport for FakeRs {
    async fn send(&self, _target: &str, request: RsRequest, _timeout: Duration) -> SievResult<RsReply> {
        match request {
            RsRequest::GetChannelInfos { .. } => {
                let mut channels = HashMap::new();
                channels.insert(
                    CHANNEL.to_string(),
                    ChannelInfo {
                        score_package: "hello".to_string(),
                        peers: self.peers.iter().map(|p| PeerTarget { peer_target: p.target.clone() }).collect(),
                    },
                );
                Ok(RsReply::ChannelInfos(channels))
            }
            RsRequest::ConnectPeer { .. } => Ok(RsReply::ConnectPeer {
                status: ConnectStatus::Connected,
                peer_list_blob: serde_json::to_string(&self.peers).unwrap(),
            }),
            _ => Ok(RsReply::Error("unsupported in this harness".to_string())),
        }
    }
}

/// Routes an outbound [`RpcRequest`] to whichever booted node is registered
/// under the target string, mirroring what a real swarm's dial-by-target
/// would eventually deliver.
#[derive(Default)]
struct SimNetwork {
    nodes: Mutex<HashMap<String, Weak<NodeService<FakeRs>>>>,
}

impl SimNetwork {
    fn register(self: &Arc<Self>, target: &str, node: &Arc<NodeService<FakeRs>>) {
        self.nodes.lock().unwrap().insert(target.to_string(), Arc::downgrade(node));
    }
}

#[async_trait]
impl Transport for SimNetwork {
    async fn send(&self, target: &str, request: RpcRequest, _timeout: Duration) -> SievResult<RpcReply> {
        let node = self.nodes.lock().unwrap().get(target).and_then(Weak::upgrade);
        let Some(node) = node else { return Err(SievError::TransportTimeout) };
        Ok(siever_engine::dispatch(&node, request))
    }
}

fn config_for(target: &str, storage: std::path::PathBuf) -> Config {
    Config {
        network: NetworkConfig { listen_addr: target.to_string(), inner_listen_addr: "127.0.0.1:0".to_string() },
        storage: StorageConfig { path: storage },
        ..Config::default()
    }
}

async fn boot_node(
    self_id: Uuid,
    target: &str,
    signer: Arc<dyn Signer>,
    net: &Arc<SimNetwork>,
    rs: FakeRs,
    storage: std::path::PathBuf,
) -> Arc<NodeService<FakeRs>> {
    let config = config_for(target, storage);
    let rs_client = RsClient::new(rs, "rs:unused");
    let node = Arc::new(NodeService::new(self_id, &config, signer, net.clone() as Arc<dyn Transport>, rs_client));
    net.register(target, &node);
    node.boot().await.unwrap();
    node
}

/// S1: one channel, one peer. A single node is its own sole member, so it
/// self-promotes to leader and is also the only audience its own
/// `BroadcastWorker` subscribes to — the loopback delivers its own proposal
/// and its own vote back to itself, reaching quorum at `1/1`.
#[tokio::test]
async fn single_node_commits_a_submitted_tx() {
    let dir = tempfile::tempdir().unwrap();
    let net = Arc::new(SimNetwork::default());
    let self_id = Uuid::new_v4();
    let signer: Arc<dyn Signer> = Arc::new(SeedDerivedSigner::derive(b"s1-seed", 0).unwrap());
    let target = "peer-a:7100";

    let entry = PeerEntry::new(self_id, "default".to_string(), target.to_string(), signer.own_cert(), 0)
        .with_status(PeerStatus::Connected);

    let node = boot_node(self_id, target, signer, &net, FakeRs { peers: vec![entry] }, dir.path().to_path_buf()).await;

    let tx = node.create_tx(CHANNEL, r#"{"hello":"world"}"#).unwrap();

    tokio::time::sleep(Duration::from_millis(1300)).await;

    let (height, _) = node.tip(CHANNEL).unwrap();
    assert_eq!(height, 1);

    let block = node.find_tx(CHANNEL, &tx.tx_hash).unwrap().expect("committed block containing the tx");
    assert!(block.confirmed_transactions.iter().any(|t| t.tx_hash == tx.tx_hash));
}

/// S2: three peers, A leader / B,C voters. Three txs submitted at A; all
/// three nodes converge on the same height and block hash.
#[tokio::test]
async fn three_peer_network_reaches_the_same_tip() {
    let net = Arc::new(SimNetwork::default());

    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    let targets = ["peer-a:7100", "peer-b:7101", "peer-c:7102"];
    let signers: Vec<Arc<dyn Signer>> = (0..3)
        .map(|i| Arc::new(SeedDerivedSigner::derive(b"s2-seed", i).unwrap()) as Arc<dyn Signer>)
        .collect();

    let membership: Vec<PeerEntry> = (0..3)
        .map(|i| {
            PeerEntry::new(ids[i], "default".to_string(), targets[i].to_string(), signers[i].own_cert(), i as u64)
                .with_status(PeerStatus::Connected)
        })
        .collect();

    let dirs: Vec<_> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();

    let mut nodes = Vec::new();
    for i in 0..3 {
        let node = boot_node(
            ids[i],
            targets[i],
            signers[i].clone(),
            &net,
            FakeRs { peers: membership.clone() },
            dirs[i].path().to_path_buf(),
        )
        .await;
        nodes.push(node);
    }

    // A real RS assigns the leader once membership settles; simulate that
    // `AnnounceNewLeader` here rather than relying on `resolve_role`'s
    // sole-member self-promotion, which doesn't apply with 3 members.
    for node in &nodes {
        node.announce_new_leader(CHANNEL, ids[0]).unwrap();
    }

    let leader = &nodes[0];
    let mut last_tx_hash = None;
    for i in 0..3 {
        let tx = leader.create_tx(CHANNEL, &format!(r#"{{"i":{i}}}"#)).unwrap();
        last_tx_hash = Some(tx.tx_hash);
    }

    tokio::time::sleep(Duration::from_millis(1300)).await;

    let tips: Vec<(u64, Option<siever_types::Hash>)> = nodes.iter().map(|n| n.tip(CHANNEL).unwrap()).collect();
    for (height, hash) in &tips {
        assert_eq!(*height, 1, "every peer should have committed exactly one block");
        assert_eq!(*hash, tips[0].1, "every peer should agree on the committed block hash");
    }

    let tx_hash = last_tx_hash.unwrap();
    for node in &nodes {
        let block = node.find_tx(CHANNEL, &tx_hash).unwrap();
        assert!(block.is_some(), "every peer should have the committed tx in its store");
    }
}
