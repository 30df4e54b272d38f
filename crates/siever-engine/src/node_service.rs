//! Node-wide composition (§4.8): owns the set of [`ChannelRuntime`]s, the
//! RS client, and the shared [`Signer`]. Boots channels sequentially and
//! drives the membership-mutating RPC handlers (`AnnounceNewPeer`,
//! `AnnounceDeletePeer`, `AnnounceNewLeader`) that each serialize with
//! `PeerManager` reads via a per-channel mutex (§5).
//!
//! Grounded in the teacher's top-level `Node` (the ractor supervisor that
//! owns one `Driver`/`NetworkRef`/`HostRef` set per running consensus
//! instance) generalized here to own one `ChannelRuntime` per channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use siever_config::Config;
use siever_consensus::actor::BlockManagerMsg;
use siever_consensus::core::{ConsensusVariant, Role};
use siever_crypto::Signer;
use siever_network::{RsTransport, Transport};
use siever_rs::RsClient;
use siever_types::{Block, Hash, PeerEntry as ChannelPeerEntry, PeerStatus, SievError, SievResult, Tx, TxType};
use siever_votekeeper::Vote as TallyVote;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel_runtime::{ChannelBootArgs, ChannelRuntime};

pub struct NodeService<T: RsTransport> {
    self_id: Uuid,
    group_id: String,
    peer_target: String,
    storage_root: PathBuf,
    variant: ConsensusVariant,
    signer: Arc<dyn Signer>,
    transport: Arc<dyn Transport>,
    rs_client: RsClient<T>,
    channels: Mutex<HashMap<String, Arc<ChannelRuntime>>>,
}

impl<T: RsTransport> NodeService<T> {
    pub fn new(
        self_id: Uuid,
        config: &Config,
        signer: Arc<dyn Signer>,
        transport: Arc<dyn Transport>,
        rs_client: RsClient<T>,
    ) -> Self {
        let variant = match config.consensus.variant {
            siever_config::ConsensusVariantConfig::Siever => ConsensusVariant::Siever,
            siever_config::ConsensusVariantConfig::Lft => ConsensusVariant::Lft,
        };

        NodeService {
            self_id,
            group_id: "default".to_string(),
            peer_target: config.network.listen_addr.clone(),
            storage_root: config.storage.path.clone(),
            variant,
            signer,
            transport,
            rs_client,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Boots every channel RS reports for this node (§4.8): `GetChannelInfos`,
    /// then `ConnectPeer` and a sequential `ChannelRuntime::start` per
    /// channel. A single channel failing to boot is logged and skipped
    /// rather than aborting the remaining channels.
    pub async fn boot(&self) -> SievResult<()> {
        let infos = self.rs_client.get_channel_infos(self.self_id, &self.peer_target, &self.group_id).await?;

        for (channel, info) in infos {
            if let Err(e) = self.boot_channel(&channel, info.score_package).await {
                warn!(%channel, error = %e, "channel failed to boot, skipping");
            }
        }

        Ok(())
    }

    async fn boot_channel(&self, channel: &str, score_package: String) -> SievResult<()> {
        let cert = self.signer.own_cert();
        let (_, peer_list_blob) = self
            .rs_client
            .connect_peer(channel, self.self_id, &self.peer_target, &self.group_id, cert)
            .await?;

        let initial_peers: Vec<ChannelPeerEntry> = serde_json::from_str(&peer_list_blob).unwrap_or_default();

        let store_path = self.storage_root.join(format!("db_{}_{}", sanitize(&self.peer_target), channel));

        let boot = ChannelBootArgs {
            channel: channel.to_string(),
            self_id: self.self_id,
            store_path,
            score_package: Some(score_package),
            variant: self.variant,
        };

        let runtime = ChannelRuntime::start(boot, initial_peers, self.signer.clone(), self.transport.clone()).await?;
        let runtime = Arc::new(runtime);
        runtime.spawn_height_sync_listener();

        info!(%channel, "channel booted");
        self.channels.lock().unwrap().insert(channel.to_string(), runtime.clone());

        // §4.7/§4.8: run Height-Sync once on startup after the BlockStore's
        // own rebuild-on-open, in case this node rejoined behind the rest
        // of the channel.
        tokio::spawn(async move {
            if let Err(e) = runtime.height_sync().await {
                warn!(channel = %runtime.channel, error = %e, "startup height-sync failed");
            }
        });
        Ok(())
    }

    fn runtime(&self, channel: &str) -> SievResult<Arc<ChannelRuntime>> {
        self.channels
            .lock()
            .unwrap()
            .get(channel)
            .cloned()
            .ok_or_else(|| SievError::ChannelUnknown(channel.to_string()))
    }

    /// Channel-level restart (§4.8): tears down the `BlockManager` and
    /// score-service handle, preserves the `BlockStore` on disk, and
    /// re-runs channel boot against the same store path.
    pub async fn restart_channel(&self, channel: &str) -> SievResult<()> {
        let arc = self.channels.lock().unwrap().remove(channel).ok_or_else(|| SievError::ChannelUnknown(channel.to_string()))?;

        let boot = arc.boot_args();
        let peers = arc.peer_manager.lock().unwrap().peers().to_vec();

        match Arc::try_unwrap(arc) {
            Ok(runtime) => runtime.shutdown().await,
            Err(arc) => {
                warn!(%channel, "channel runtime still referenced elsewhere, restarting without a clean shutdown");
                drop(arc);
            }
        }

        let restarted = ChannelRuntime::start(boot, peers, self.signer.clone(), self.transport.clone()).await?;
        let restarted = Arc::new(restarted);
        restarted.spawn_height_sync_listener();
        self.channels.lock().unwrap().insert(channel.to_string(), restarted.clone());
        info!(%channel, "channel restarted");

        tokio::spawn(async move {
            if let Err(e) = restarted.height_sync().await {
                warn!(channel = %restarted.channel, error = %e, "post-restart height-sync failed");
            }
        });
        Ok(())
    }

    pub fn submit_tx(&self, channel: &str, tx: Tx) -> SievResult<()> {
        self.runtime(channel)?.submit_tx(tx);
        Ok(())
    }

    pub fn self_id(&self) -> Uuid {
        self.self_id
    }

    /// `CreateTx` (§6): builds and signs a `Tx` from raw JSON data, then
    /// admits it the same way `AddTx` would.
    pub fn create_tx(&self, channel: &str, data_json: &str) -> SievResult<Tx> {
        let data = data_json.as_bytes().to_vec();
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let tx_hash = Tx::compute_hash(channel, self.self_id, timestamp, &data);
        let signature = self.signer.sign_hash(tx_hash.as_bytes());

        let tx = Tx {
            tx_hash,
            channel: channel.to_string(),
            peer_id: self.self_id,
            score_id: String::new(),
            score_version: String::new(),
            timestamp,
            data,
            signature,
            public_key: self.signer.public_key(),
            tx_type: TxType::Regular,
        };

        self.submit_tx(channel, tx.clone())?;
        Ok(tx)
    }

    pub fn tip(&self, channel: &str) -> SievResult<(u64, Option<Hash>)> {
        self.runtime(channel)?.tip()
    }

    pub fn total_tx(&self, channel: &str) -> SievResult<u64> {
        Ok(self.runtime(channel)?.stats()?.1)
    }

    pub fn find_by_hash(&self, channel: &str, hash: &Hash) -> SievResult<Option<Block>> {
        self.runtime(channel)?.find_by_hash(hash)
    }

    pub fn find_by_height(&self, channel: &str, height: u64) -> SievResult<Option<Block>> {
        self.runtime(channel)?.find_by_height(height)
    }

    pub fn find_tx(&self, channel: &str, tx_hash: &Hash) -> SievResult<Option<Block>> {
        self.runtime(channel)?.find_tx(tx_hash)
    }

    pub fn invoke_result(&self, channel: &str, tx_hash: &Hash) -> SievResult<Option<String>> {
        self.runtime(channel)?.invoke_result(tx_hash)
    }

    pub fn subscribe(&self, channel: &str, target: String) -> SievResult<()> {
        self.runtime(channel)?.subscribe(target);
        Ok(())
    }

    pub fn unsubscribe(&self, channel: &str, target: String) -> SievResult<()> {
        self.runtime(channel)?.unsubscribe(target);
        Ok(())
    }

    pub fn announce_unconfirmed(&self, channel: &str, block: Block) -> SievResult<()> {
        self.runtime(channel)?.announce_unconfirmed(block);
        Ok(())
    }

    pub fn announce_confirmed(&self, channel: &str, block_hash: Hash, body: Option<Block>) -> SievResult<()> {
        self.runtime(channel)?.announce_confirmed(block_hash, body);
        Ok(())
    }

    pub fn vote(&self, channel: &str, block_hash: Hash, peer_id: Uuid, vote: TallyVote) -> SievResult<()> {
        self.runtime(channel)?.vote(block_hash, peer_id, vote);
        Ok(())
    }

    pub async fn height_sync(&self, channel: &str) -> SievResult<()> {
        self.runtime(channel)?.height_sync().await
    }

    /// `AnnounceNewPeer` (§4.8, §5): adds or updates a member in one
    /// channel's `PeerManager`, serialized via its mutex.
    pub fn announce_new_peer(&self, channel: &str, peer: ChannelPeerEntry) -> SievResult<()> {
        self.runtime(channel)?.peer_manager.lock().unwrap().add(peer);
        Ok(())
    }

    /// `AnnounceDeletePeer` (§4.8, §5).
    pub fn announce_delete_peer(&self, channel: &str, peer_id: Uuid) -> SievResult<()> {
        self.runtime(channel)?.peer_manager.lock().unwrap().remove(peer_id);
        Ok(())
    }

    /// `AnnounceNewLeader` (§4.6, §4.8): sets the new leader and flips this
    /// node's own role via the BlockManager actor.
    pub fn announce_new_leader(&self, channel: &str, leader_peer_id: Uuid) -> SievResult<()> {
        let runtime = self.runtime(channel)?;
        runtime.peer_manager.lock().unwrap().set_leader(leader_peer_id)?;

        let role = if leader_peer_id == self.self_id { Role::Leader } else { Role::Voter };
        let _ = runtime.consensus.cast(BlockManagerMsg::SetRole(role));
        Ok(())
    }

    /// `(channel, last_height, total_tx)` for every booted channel, for the
    /// metrics exporter's periodic poll (§2 **[FULL]**).
    pub fn channel_stats(&self) -> Vec<(String, u64, u64)> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(channel, runtime)| runtime.stats().ok().map(|(h, t)| (channel.clone(), h, t)))
            .collect()
    }

    pub fn connected_peer_count(&self, channel: &str) -> SievResult<usize> {
        let runtime = self.runtime(channel)?;
        let count = runtime
            .peer_manager
            .lock()
            .unwrap()
            .peers()
            .iter()
            .filter(|p| p.status != PeerStatus::Disconnected)
            .count();
        Ok(count)
    }

    pub async fn shutdown(self) {
        let runtimes: Vec<Arc<ChannelRuntime>> = self.channels.into_inner().unwrap().into_values().collect();
        for runtime in runtimes {
            match Arc::try_unwrap(runtime) {
                Ok(runtime) => runtime.shutdown().await,
                Err(_) => warn!("channel runtime still referenced elsewhere at node shutdown"),
            }
        }
    }
}

fn sanitize(target: &str) -> String {
    target.chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect()
}
