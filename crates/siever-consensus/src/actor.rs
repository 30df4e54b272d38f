//! The `ractor` shell around [`crate::core::BlockManagerCore`]: owns the
//! actual IO capabilities (`BlockStore`, `Signer`, `BroadcastWorkerRef`,
//! `PeerManager`) and executes the pure core's `Output`s against them,
//! mirroring how the teacher's `Node` actor holds `NetworkRef`/`HostRef`/
//! `WalRef` handles and never touches their internals directly.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use siever_crypto::Signer;
use siever_network::rpc::RpcRequest;
use siever_network::{BroadcastMsg, BroadcastWorkerRef};
use siever_peer::PeerManager;
use siever_store::BlockStore;
use siever_types::constants::{BLOCK_VOTE_TIMEOUT, INTERVAL_BLOCKGENERATION};
use siever_types::{Block, Hash, Tx};
use siever_votekeeper::Vote as TallyVote;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{BlockManagerCore, ConsensusVariant, FaultInjection, Output, Role};

pub type BlockManagerRef = ActorRef<BlockManagerMsg>;

pub enum BlockManagerMsg {
    SubmitTx(Tx),
    AnnounceUnconfirmedBlock(Block),
    AnnounceConfirmedBlock { block_hash: Hash, body: Option<Block> },
    VoteUnconfirmedBlock { block_hash: Hash, peer_id: Uuid, vote: TallyVote },
    SetRole(Role),
    SetFaultInjection(FaultInjection),
    /// Internal: one tick of the leader block-generation loop.
    Tick,
    /// Internal: `TIMEOUT_FOR_PEER_VOTE` elapsed with no piggy-back
    /// confirmation for `block_hash` (LFT variant only).
    VoteTimeout(Hash),
    /// Internal: `BLOCK_VOTE_TIMEOUT` elapsed on an open candidate.
    CandidateDeadline(Hash),
}

pub struct BlockManagerArgs {
    pub self_id: Uuid,
    pub channel: String,
    pub role: Role,
    pub variant: ConsensusVariant,
    pub store: BlockStore,
    pub signer: Arc<dyn Signer>,
    pub broadcast: BroadcastWorkerRef,
    pub peer_manager: Arc<Mutex<PeerManager>>,
    /// Signalled whenever the pure core emits `Output::RequestHeightSync`;
    /// drained by the owning `ChannelRuntime`, which holds the
    /// `Transport`/peer-list capability this actor deliberately doesn't
    /// (§9 "Cyclic references").
    pub height_sync_tx: mpsc::UnboundedSender<()>,
}

pub struct BlockManagerActor;

pub struct State {
    core: BlockManagerCore,
    store: BlockStore,
    signer: Arc<dyn Signer>,
    broadcast: BroadcastWorkerRef,
    peer_manager: Arc<Mutex<PeerManager>>,
    height_sync_tx: mpsc::UnboundedSender<()>,
    tick_handle: Option<ractor::concurrency::JoinHandle<()>>,
}

impl State {
    fn connected_voter_count(&self) -> usize {
        self.peer_manager
            .lock()
            .unwrap()
            .peers()
            .iter()
            .filter(|p| p.status != siever_types::PeerStatus::Disconnected)
            .count()
    }

    fn chain_tip(&self) -> (u64, Hash) {
        let height = self.store.last_height().unwrap_or(0);
        let hash = self.store.last_block_hash().unwrap_or(Hash::ZERO);
        (height, hash)
    }

    /// Resolves a proposer's verification key from its `PeerManager` cert
    /// (§3, `PeerEntry.cert`). An unknown peer yields an empty key, which
    /// fails every signature check rather than panicking.
    fn proposer_public_key(&self, peer_id: Uuid) -> Vec<u8> {
        self.peer_manager
            .lock()
            .unwrap()
            .find(peer_id)
            .and_then(|entry| siever_crypto::public_key_from_cert(&entry.cert))
            .map(|k| k.to_vec())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Actor for BlockManagerActor {
    type Msg = BlockManagerMsg;
    type State = State;
    type Arguments = BlockManagerArgs;

    async fn pre_start(&self, myself: BlockManagerRef, args: BlockManagerArgs) -> Result<State, ActorProcessingErr> {
        let core = BlockManagerCore::new(args.self_id, args.channel, args.role, args.variant);

        let tick_handle = if args.role == Role::Leader {
            Some(myself.send_interval(INTERVAL_BLOCKGENERATION, || BlockManagerMsg::Tick))
        } else {
            None
        };

        Ok(State {
            core,
            store: args.store,
            signer: args.signer,
            broadcast: args.broadcast,
            peer_manager: args.peer_manager,
            height_sync_tx: args.height_sync_tx,
            tick_handle,
        })
    }

    async fn handle(&self, myself: BlockManagerRef, msg: BlockManagerMsg, state: &mut State) -> Result<(), ActorProcessingErr> {
        match msg {
            BlockManagerMsg::SubmitTx(tx) => {
                state.core.enqueue_tx(tx);
            }

            BlockManagerMsg::SetFaultInjection(fault) => {
                state.core.fault_injection = fault;
            }

            BlockManagerMsg::SetRole(role) => {
                let was_leader = state.core.role == Role::Leader;
                state.core.set_role(role);

                if role == Role::Leader && !was_leader {
                    state.tick_handle = Some(myself.send_interval(INTERVAL_BLOCKGENERATION, || BlockManagerMsg::Tick));
                } else if role != Role::Leader {
                    if let Some(handle) = state.tick_handle.take() {
                        handle.abort();
                    }
                }
            }

            BlockManagerMsg::AnnounceUnconfirmedBlock(block) => {
                let (last_height, last_block_hash) = state.chain_tip();
                let pending = state.core.staged_unconfirmed().cloned();
                let proposer_public_key = state.proposer_public_key(block.peer_id);
                let outputs = state.core.on_announce_unconfirmed(
                    block,
                    state.signer.as_ref(),
                    last_height,
                    last_block_hash,
                    pending.as_ref(),
                    &proposer_public_key,
                );
                apply_outputs(myself.clone(), state, outputs).await?;
            }

            BlockManagerMsg::AnnounceConfirmedBlock { block_hash, body } => {
                let outputs = state.core.on_announce_confirmed(block_hash, body);
                apply_outputs(myself.clone(), state, outputs).await?;
            }

            BlockManagerMsg::VoteUnconfirmedBlock { block_hash, peer_id, vote } => {
                let voters = state.connected_voter_count();
                let outputs = state.core.on_vote(block_hash, peer_id, vote, voters);
                apply_outputs(myself.clone(), state, outputs).await?;
            }

            BlockManagerMsg::Tick => {
                let (last_height, last_block_hash) = state.chain_tip();
                let timestamp = unix_now();
                let voters = state.connected_voter_count();
                let outputs = state.core.leader_tick(last_height, last_block_hash, timestamp, state.signer.as_ref(), voters);

                let surrendered = outputs.iter().any(|o| matches!(o, Output::SurrenderLeadership));
                apply_outputs(myself.clone(), state, outputs).await?;

                if surrendered {
                    if let Some(handle) = state.tick_handle.take() {
                        handle.abort();
                    }
                } else if let Some(staged) = state.core.staged_unconfirmed().cloned() {
                    let hash = staged.block_hash;
                    let myself2 = myself.clone();
                    myself.send_after(BLOCK_VOTE_TIMEOUT, move || BlockManagerMsg::CandidateDeadline(hash));
                    let _ = myself2;
                }
            }

            BlockManagerMsg::VoteTimeout(block_hash) => {
                let outputs = state.core.on_vote_timeout(block_hash);
                apply_outputs(myself.clone(), state, outputs).await?;
            }

            BlockManagerMsg::CandidateDeadline(block_hash) => {
                state.core.close_failed(&block_hash);
                warn!(%block_hash, "candidate block timed out without quorum, discarding");
            }
        }

        Ok(())
    }

    async fn post_stop(&self, _myself: BlockManagerRef, state: &mut State) -> Result<(), ActorProcessingErr> {
        if let Some(handle) = state.tick_handle.take() {
            handle.abort();
        }
        Ok(())
    }
}

async fn apply_outputs(myself: BlockManagerRef, state: &mut State, outputs: Vec<Output>) -> Result<(), ActorProcessingErr> {
    for output in outputs {
        match output {
            Output::Broadcast(request) => {
                let _ = state.broadcast.cast(BroadcastMsg::Broadcast(request));
            }

            Output::Commit(block) => {
                let hash = block.block_hash;
                match state.store.append(&block) {
                    Ok(()) => info!(height = block.height, %hash, "committed block"),
                    Err(e) => warn!(%hash, error = %e, "failed to commit confirmed block"),
                }
            }

            Output::StartVoteTimer { block_hash, duration } => {
                myself.send_after(duration, move || BlockManagerMsg::VoteTimeout(block_hash));
            }

            Output::RequestHeightSync => {
                // The actual height-sync run is driven by the owning
                // `ChannelRuntime`, which holds the `Transport`/peer-list
                // capability this actor deliberately doesn't have; signal it
                // over the mpsc handed in at construction and let it drain.
                warn!("height-sync requested by block manager");
                let _ = state.height_sync_tx.send(());
            }

            Output::SurrenderLeadership => {
                info!("surrendering leadership at creation-count limit");
                let request = RpcRequest::ComplainLeader {
                    channel: String::new(),
                    complained_leader_id: Uuid::nil(),
                    new_leader_id: Uuid::nil(),
                    message: "leader block creation limit reached".to_string(),
                };
                let _ = request; // concrete peer ids filled in by ChannelRuntime's role-rotation handler
            }
        }
    }

    Ok(())
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use siever_crypto::SeedDerivedSigner;
    use siever_network::transport::Transport;
    use siever_network::rpc::RpcReply;
    use siever_types::genesis_block;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _target: &str, _request: RpcRequest, _timeout: Duration) -> siever_types::SievResult<RpcReply> {
            Ok(RpcReply::Common(siever_network::rpc::CommonReply::ok()))
        }
    }

    #[tokio::test]
    async fn leader_ticks_and_broadcasts_a_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BlockStore::open(dir.path().join("chain.redb")).unwrap();
        store.append(&genesis_block("chain1")).unwrap();

        let transport: Arc<dyn Transport> = Arc::new(NullTransport);
        let worker = siever_network::BroadcastWorker::new(transport, None);
        let (broadcast, broadcast_handle) = Actor::spawn(None, worker, ()).await.unwrap();

        let signer: Arc<dyn Signer> = Arc::new(SeedDerivedSigner::derive(b"actor-test", 0).unwrap());
        let peer_manager = Arc::new(Mutex::new(PeerManager::new()));
        let (height_sync_tx, _height_sync_rx) = mpsc::unbounded_channel();

        let args = BlockManagerArgs {
            self_id: Uuid::new_v4(),
            channel: "chain1".to_string(),
            role: Role::Leader,
            variant: ConsensusVariant::Siever,
            store,
            signer,
            broadcast: broadcast.clone(),
            peer_manager,
            height_sync_tx,
        };

        let (actor, handle) = Actor::spawn(None, BlockManagerActor, args).await.unwrap();
        let tx = sample_tx();
        actor.cast(BlockManagerMsg::SubmitTx(tx)).unwrap();
        actor.cast(BlockManagerMsg::Tick).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        actor.stop(None);
        let _ = handle.await;
        broadcast.stop(None);
        let _ = broadcast_handle.await;
    }

    fn sample_tx() -> Tx {
        let signer = SeedDerivedSigner::derive(b"actor-test-tx", 1).unwrap();
        let peer_id = Uuid::new_v4();
        let timestamp = 1;
        let data = b"payload".to_vec();
        let tx_hash = Tx::compute_hash("chain1", peer_id, timestamp, &data);
        let signature = signer.sign_hash(tx_hash.as_bytes());

        Tx {
            tx_hash,
            channel: "chain1".to_string(),
            peer_id,
            score_id: "score".to_string(),
            score_version: "1.0".to_string(),
            timestamp,
            data,
            signature,
            public_key: signer.public_key(),
            tx_type: siever_types::TxType::Regular,
        }
    }
}
