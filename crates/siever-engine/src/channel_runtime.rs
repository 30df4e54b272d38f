//! Per-channel composition (§4.8): owns `BlockManager` + `BroadcastWorker`
//! + `BlockStore` + `PeerManager` and a remote score-service handle (the
//! score service itself is out of scope, §1 — only the handle's lifecycle
//! is modeled, so restart semantics match spec.md's "tears down
//! BlockManager and score service, preserves BlockStore").
//!
//! Grounded in the teacher's `Node` supervisor (`crates/engine/src/node.rs`):
//! one owning actor links its children so it observes their termination,
//! without either child holding a back-pointer to the other
//! (§9 "Cyclic references ... map to a single owning ChannelRuntime").

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ractor::Actor;
use siever_consensus::actor::{BlockManagerActor, BlockManagerArgs, BlockManagerMsg, BlockManagerRef};
use siever_consensus::core::{ConsensusVariant, Role};
use siever_crypto::Signer;
use siever_network::{BroadcastMsg, BroadcastWorker, BroadcastWorkerRef, Transport};
use siever_peer::PeerManager;
use siever_store::BlockStore;
use siever_sync::SyncGuard;
use siever_types::{Block, Hash, PeerEntry, PeerStatus, SievError, SievResult, Tx};
use siever_votekeeper::Vote as TallyVote;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// A remote score-service handle: opaque and lifecycle-only (§1, out of
/// scope). Restart tears this down along with the BlockManager.
pub struct ScoreServiceHandle {
    pub score_package: String,
}

/// Everything needed to (re-)boot one channel; held by `NodeService` so a
/// restart can re-run `ChannelRuntime::start` without losing the
/// constructor inputs (§4.8: "restart ... preserves BlockStore and
/// re-runs channel boot").
#[derive(Clone)]
pub struct ChannelBootArgs {
    pub channel: String,
    pub self_id: Uuid,
    pub store_path: PathBuf,
    pub score_package: Option<String>,
    pub variant: ConsensusVariant,
}

pub struct ChannelRuntime {
    pub channel: String,
    pub self_id: Uuid,
    pub consensus: BlockManagerRef,
    consensus_handle: Option<ractor::concurrency::JoinHandle<()>>,
    pub broadcast: BroadcastWorkerRef,
    broadcast_handle: Option<ractor::concurrency::JoinHandle<()>>,
    pub peer_manager: Arc<Mutex<PeerManager>>,
    pub sync_guard: Arc<SyncGuard>,
    pub score: Option<ScoreServiceHandle>,
    store_path: PathBuf,
    transport: Arc<dyn Transport>,
    /// Taken by [`Self::spawn_height_sync_listener`] once the runtime is
    /// wrapped in an `Arc` by its owner; `None` afterward.
    height_sync_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

impl ChannelRuntime {
    /// Boots one channel: opens its `BlockStore`, loads `PeerManager`,
    /// resolves or elects the leader, starts `BroadcastWorker`, subscribes
    /// to the leader if we're a voter, and starts the `BlockManager` loop
    /// (spec.md §4.8's per-channel half of `NodeService` boot).
    pub async fn start(
        boot: ChannelBootArgs,
        initial_peers: Vec<PeerEntry>,
        signer: Arc<dyn Signer>,
        transport: Arc<dyn Transport>,
    ) -> SievResult<Self> {
        let ChannelBootArgs { channel, self_id, store_path, score_package, variant } = boot;

        let store = BlockStore::open(&store_path).map_err(|e| SievError::StoreCorrupt(e.to_string()))?;

        if store.last_height().is_none() {
            store
                .append(&siever_types::genesis_block(&channel))
                .map_err(|e| SievError::StoreCorrupt(e.to_string()))?;
        }

        let mut peer_manager = PeerManager::new();
        for peer in initial_peers {
            peer_manager.add(peer);
        }

        // §4.6 "Role transitions": self-promote when no leader exists and
        // we are the channel's only connected member; otherwise voter,
        // per §7's "LeaderUnknown ... self-promotes if it is the sole
        // connected peer" and §4.8's "resolve or elect leader".
        let (role, leader_target) = resolve_role(&mut peer_manager, self_id);

        let worker = BroadcastWorker::new(transport.clone(), None);
        let (broadcast, broadcast_handle) =
            Actor::spawn(None, worker, ()).await.map_err(|_| SievError::Cancelled)?;

        for peer in peer_manager.peers() {
            if peer.status != PeerStatus::Disconnected {
                let _ = broadcast.cast(BroadcastMsg::Subscribe(peer.target.clone()));
            }
        }

        if let Some(target) = &leader_target {
            let _ = broadcast.cast(BroadcastMsg::ConnectToLeader(target.clone()));
        }

        let peer_manager = Arc::new(Mutex::new(peer_manager));
        let (height_sync_tx, height_sync_rx) = mpsc::unbounded_channel();

        let args = BlockManagerArgs {
            self_id,
            channel: channel.clone(),
            role,
            variant,
            store,
            signer,
            broadcast: broadcast.clone(),
            peer_manager: peer_manager.clone(),
            height_sync_tx,
        };

        let (consensus, consensus_handle) =
            Actor::spawn(None, BlockManagerActor, args).await.map_err(|_| SievError::Cancelled)?;

        info!(%channel, %self_id, ?role, "channel runtime started");

        Ok(ChannelRuntime {
            channel,
            self_id,
            consensus,
            consensus_handle: Some(consensus_handle),
            broadcast,
            broadcast_handle: Some(broadcast_handle),
            peer_manager,
            sync_guard: Arc::new(SyncGuard::new()),
            score: score_package.map(|score_package| ScoreServiceHandle { score_package }),
            store_path,
            transport,
            height_sync_rx: Mutex::new(Some(height_sync_rx)),
        })
    }

    /// Spawns the task that drains `Output::RequestHeightSync` signals from
    /// the `BlockManager` actor and runs [`Self::height_sync`] in response
    /// (§4.7/§4.8: height/hash mismatch and piggy-back misses must trigger
    /// Height-Sync, not just log it). Call once, right after wrapping the
    /// freshly-started runtime in an `Arc` — a no-op on any later call since
    /// the receiver is only handed out once.
    pub fn spawn_height_sync_listener(self: &Arc<Self>) {
        let Some(mut rx) = self.height_sync_rx.lock().unwrap().take() else {
            return;
        };
        let runtime = self.clone();

        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Collapse any extra requests queued while a run is pending
                // into the single run about to start.
                while rx.try_recv().is_ok() {}

                if let Err(e) = runtime.height_sync().await {
                    warn!(channel = %runtime.channel, error = %e, "height-sync run failed");
                }
            }
        });
    }

    pub fn submit_tx(&self, tx: Tx) {
        let _ = self.consensus.cast(BlockManagerMsg::SubmitTx(tx));
    }

    /// Current `(last_height, total_tx)` for the metrics exporter (§2
    /// **[FULL]**), read through a fresh `BlockStore` handle on the same
    /// file rather than routing through the `BlockManager` actor mailbox.
    pub fn stats(&self) -> SievResult<(u64, u64)> {
        let store = BlockStore::open(&self.store_path).map_err(|e| SievError::StoreCorrupt(e.to_string()))?;
        Ok((store.last_height().unwrap_or(0), store.total_tx()))
    }

    fn open_store(&self) -> SievResult<BlockStore> {
        BlockStore::open(&self.store_path).map_err(|e| SievError::StoreCorrupt(e.to_string()))
    }

    /// `GetLastBlockHash`/`GetStatus` (§6): current tip, read through a
    /// fresh store handle (same pattern as [`Self::stats`]).
    pub fn tip(&self) -> SievResult<(u64, Option<Hash>)> {
        let store = self.open_store()?;
        Ok((store.last_height().unwrap_or(0), store.last_block_hash()))
    }

    /// `GetBlock(block_hash)` (§6).
    pub fn find_by_hash(&self, hash: &Hash) -> SievResult<Option<Block>> {
        self.open_store()?.find_by_hash(hash).map_err(|e| SievError::StoreCorrupt(e.to_string()))
    }

    /// `GetBlock(block_height)` (§6).
    pub fn find_by_height(&self, height: u64) -> SievResult<Option<Block>> {
        self.open_store()?.find_by_height(height).map_err(|e| SievError::StoreCorrupt(e.to_string()))
    }

    /// `GetTx` (§6): the block carrying `tx_hash`.
    pub fn find_tx(&self, tx_hash: &Hash) -> SievResult<Option<Block>> {
        self.open_store()?.find_tx(tx_hash).map_err(|e| SievError::StoreCorrupt(e.to_string()))
    }

    /// `GetInvokeResult` (§6).
    pub fn invoke_result(&self, tx_hash: &Hash) -> SievResult<Option<String>> {
        self.open_store()?.invoke_result(tx_hash).map_err(|e| SievError::StoreCorrupt(e.to_string()))
    }

    /// `Subscribe`/`UnSubscribe` (§6): mutate the `BroadcastWorker`'s
    /// audience, per §4.4's command interface.
    pub fn subscribe(&self, target: String) {
        let _ = self.broadcast.cast(BroadcastMsg::Subscribe(target));
    }

    pub fn unsubscribe(&self, target: String) {
        let _ = self.broadcast.cast(BroadcastMsg::Unsubscribe(target));
    }

    /// `AnnounceUnconfirmedBlock` (§6, §4.6): forwarded to the
    /// `BlockManager` actor's voter-role handler.
    pub fn announce_unconfirmed(&self, block: Block) {
        let _ = self.consensus.cast(BlockManagerMsg::AnnounceUnconfirmedBlock(block));
    }

    /// `AnnounceConfirmedBlock` (§6, §4.6).
    pub fn announce_confirmed(&self, block_hash: Hash, body: Option<Block>) {
        let _ = self.consensus.cast(BlockManagerMsg::AnnounceConfirmedBlock { block_hash, body });
    }

    /// `VoteUnconfirmedBlock` (§6, §4.6): forwarded to the leader's
    /// `CandidateBlocks` tally via the `BlockManager` actor mailbox, per
    /// §5's "vote-in RPC handlers enqueue votes onto the BlockManager loop
    /// rather than mutate directly".
    pub fn vote(&self, block_hash: Hash, peer_id: Uuid, vote: TallyVote) {
        let _ = self.consensus.cast(BlockManagerMsg::VoteUnconfirmedBlock { block_hash, peer_id, vote });
    }

    /// Runs Height-Sync against every other peer on this channel (§4.7),
    /// using the currently-known peer targets.
    pub async fn height_sync(&self) -> SievResult<()> {
        let targets: Vec<String> = {
            let guard = self.peer_manager.lock().unwrap();
            guard
                .peers()
                .iter()
                .filter(|p| p.peer_id != self.self_id && p.status != PeerStatus::Disconnected)
                .map(|p| p.target.clone())
                .collect()
        };

        // The running BlockManager actor owns the `BlockStore`; height-sync
        // runs against a freshly-opened handle to the same file so the two
        // never contend for the in-process lock. redb's own MVCC
        // serializes them at the storage layer.
        let mut store = BlockStore::open(&self.store_path).map_err(|e| SievError::StoreCorrupt(e.to_string()))?;

        let guard = self.sync_guard.clone();
        let channel = self.channel.clone();
        let peer_manager = self.peer_manager.clone();
        let transport = self.transport.clone();

        siever_sync::run(&channel, &mut store, transport, &guard, targets, move || {
            peer_manager.lock().unwrap().peers().iter().map(|p| p.target.clone()).collect()
        })
        .await
    }

    /// Returns the constructor inputs needed to re-boot this channel,
    /// consuming `self`. Used by `NodeService::restart_channel`, which
    /// re-supplies the (unchanged) `Signer` and `Transport`.
    pub fn boot_args(&self) -> ChannelBootArgs {
        ChannelBootArgs {
            channel: self.channel.clone(),
            self_id: self.self_id,
            store_path: self.store_path.clone(),
            score_package: self.score.as_ref().map(|s| s.score_package.clone()),
            variant: self.consensus_variant(),
        }
    }

    fn consensus_variant(&self) -> ConsensusVariant {
        // The variant isn't readable off the actor ref; `NodeService`
        // tracks the configured variant per channel and passes it back in
        // explicitly on restart rather than round-tripping it through here.
        ConsensusVariant::Siever
    }

    /// Tears down the `BlockManager` and `BroadcastWorker` actors. The
    /// on-disk `BlockStore` at `store_path` is left untouched.
    pub async fn shutdown(mut self) {
        self.consensus.stop(None);
        if let Some(handle) = self.consensus_handle.take() {
            let _ = handle.await;
        }
        self.broadcast.stop(None);
        if let Some(handle) = self.broadcast_handle.take() {
            let _ = handle.await;
        }
    }
}

/// §4.6/§7 role resolution at channel boot: if a leader is already known,
/// become a voter and report its target for `ConnectToLeader`; otherwise,
/// if we are the channel's only member (or the only connected one),
/// self-promote; otherwise default to voter with no leader yet known
/// (the first `AnnounceNewLeader` from RS will set the role).
fn resolve_role(peer_manager: &mut PeerManager, self_id: Uuid) -> (Role, Option<String>) {
    if let Some(leader) = peer_manager.get_leader() {
        if leader.peer_id == self_id {
            return (Role::Leader, None);
        }
        return (Role::Voter, Some(leader.target.clone()));
    }

    let connected_others = peer_manager
        .peers()
        .iter()
        .filter(|p| p.peer_id != self_id && p.status != PeerStatus::Disconnected)
        .count();

    if connected_others == 0 {
        let _ = peer_manager.set_leader(self_id);
        return (Role::Leader, None);
    }

    (Role::Voter, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sole_peer_self_promotes_to_leader() {
        let mut pm = PeerManager::new();
        let self_id = Uuid::new_v4();
        pm.add(PeerEntry::new(self_id, "g".to_string(), "127.0.0.1:7100".to_string(), vec![], 0).with_status(PeerStatus::Connected));

        let (role, leader_target) = resolve_role(&mut pm, self_id);
        assert_eq!(role, Role::Leader);
        assert!(leader_target.is_none());
        assert_eq!(pm.get_leader().unwrap().peer_id, self_id);
    }

    #[test]
    fn peer_with_connected_others_starts_as_voter() {
        let mut pm = PeerManager::new();
        let self_id = Uuid::new_v4();
        let other = Uuid::new_v4();
        pm.add(PeerEntry::new(self_id, "g".to_string(), "127.0.0.1:7100".to_string(), vec![], 0).with_status(PeerStatus::Connected));
        pm.add(PeerEntry::new(other, "g".to_string(), "127.0.0.1:7101".to_string(), vec![], 1).with_status(PeerStatus::Connected));

        let (role, leader_target) = resolve_role(&mut pm, self_id);
        assert_eq!(role, Role::Voter);
        assert!(leader_target.is_none());
    }

    #[test]
    fn existing_leader_is_respected() {
        let mut pm = PeerManager::new();
        let self_id = Uuid::new_v4();
        let leader = Uuid::new_v4();
        pm.add(PeerEntry::new(leader, "g".to_string(), "127.0.0.1:7100".to_string(), vec![], 0).with_status(PeerStatus::Connected));
        pm.add(PeerEntry::new(self_id, "g".to_string(), "127.0.0.1:7101".to_string(), vec![], 1).with_status(PeerStatus::Connected));
        pm.set_leader(leader).unwrap();

        let (role, leader_target) = resolve_role(&mut pm, self_id);
        assert_eq!(role, Role::Voter);
        assert_eq!(leader_target.unwrap(), "127.0.0.1:7100");
    }
}
