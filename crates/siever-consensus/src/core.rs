//! The pure block-agreement logic (§4.6), kept free of actor machinery and
//! IO so it can be driven and unit-tested directly — the teacher's
//! `core-driver::Driver` keeps round-state transitions this way, separate
//! from whatever actor shell schedules it; `BlockManagerCore` plays the
//! same role here for the leader/voter state machine.

use std::collections::VecDeque;
use std::time::Duration;

use siever_crypto::Signer;
use siever_types::constants::{
    BLOCK_VOTE_TIMEOUT, LEADER_BLOCK_CREATION_LIMIT, MAX_BLOCK_KBYTES, MAX_BLOCK_TX_NUM,
    TEST_FAIL_VOTE_SIGN, TIMEOUT_FOR_PEER_VOTE,
};
use siever_types::{Block, BlockType, Hash, SievError, Tx};
use siever_votekeeper::{CandidateBlocks, Outcome, Vote as TallyVote};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Voter,
    Leader,
}

/// Consensus variant, per spec.md §4.6's "if LFT consensus is configured":
/// Siever skips the per-block vote timer (piggy-back confirmation alone
/// drives liveness); LFT adds a bounded wait before falling back to sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsensusVariant {
    Siever,
    Lft,
}

/// A config-gated fault-injection mode (REDESIGN FLAGS, spec.md §9):
/// replaces the original's `TEST_FAIL_VOTE_SIGN` wire sentinel with an
/// explicit opt-in so production code paths never special-case a magic
/// string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaultInjection {
    pub always_nay_vote: bool,
}

/// Side effects `BlockManagerCore` asks its actor shell to perform. The
/// core never broadcasts, persists, or sets timers itself.
#[derive(Debug)]
pub enum Output {
    Broadcast(siever_network::rpc::RpcRequest),
    Commit(Block),
    StartVoteTimer { block_hash: Hash, duration: Duration },
    RequestHeightSync,
    SurrenderLeadership,
}

pub struct BlockManagerCore {
    pub role: Role,
    pub self_id: Uuid,
    pub channel: String,
    pub variant: ConsensusVariant,
    pub fault_injection: FaultInjection,

    tx_queue: VecDeque<Tx>,
    staged_unconfirmed: Option<Block>,
    candidates: CandidateBlocks,
    made_block_count: u32,
    prior_candidate_confirmed: bool,
}

impl BlockManagerCore {
    pub fn new(self_id: Uuid, channel: String, role: Role, variant: ConsensusVariant) -> Self {
        BlockManagerCore {
            role,
            self_id,
            channel,
            variant,
            fault_injection: FaultInjection::default(),
            tx_queue: VecDeque::new(),
            staged_unconfirmed: None,
            candidates: CandidateBlocks::new(),
            made_block_count: 0,
            prior_candidate_confirmed: false,
        }
    }

    /// A peer becomes Leader/Voter when PeerManager declares it so; role
    /// change resets `made_block_count` and opens a fresh CandidateBlocks
    /// (spec.md §4.6, "Role transitions").
    pub fn set_role(&mut self, role: Role) {
        self.role = role;
        self.made_block_count = 0;
        self.candidates = CandidateBlocks::new();
        self.prior_candidate_confirmed = false;
    }

    pub fn enqueue_tx(&mut self, tx: Tx) {
        self.tx_queue.push_back(tx);
    }

    pub fn staged_unconfirmed(&self) -> Option<&Block> {
        self.staged_unconfirmed.as_ref()
    }

    /// Voter-role handling of an incoming `AnnounceUnconfirmedBlock`.
    ///
    /// `last_height`/`last_block_hash` describe the local BlockStore's tip;
    /// `pending_unconfirmed_at_height` is the previously-staged block at
    /// `last_height + 1`, if any, used for piggy-back confirmation.
    pub fn on_announce_unconfirmed(
        &mut self,
        block: Block,
        signer: &dyn Signer,
        last_height: u64,
        last_block_hash: Hash,
        pending_unconfirmed_at_height: Option<&Block>,
        proposer_public_key: &[u8],
    ) -> Vec<Output> {
        let mut outputs = Vec::new();
        let mut last_height = last_height;
        let mut last_block_hash = last_block_hash;

        if block.prev_block_confirm {
            match pending_unconfirmed_at_height {
                Some(pending) if pending.block_hash == block.prev_block_hash && pending.height == last_height + 1 => {
                    // Commit the piggy-backed previous block, then fall
                    // through and process `block` itself against the new
                    // tip — `loopchain/peer/block_manager.py` queues the
                    // just-announced block for validation/voting right
                    // after confirming the prior one, it does not discard
                    // it (block_manager.py:219-255).
                    outputs.push(Output::Commit(pending.clone()));
                    last_height = pending.height;
                    last_block_hash = pending.block_hash;
                }
                _ => {
                    outputs.push(Output::RequestHeightSync);
                    return outputs;
                }
            }
        }

        if block.block_type == BlockType::PeerList {
            outputs.push(Output::Commit(block));
            return outputs;
        }

        let validation = validate_block(&block, last_height, last_block_hash, proposer_public_key, signer);

        match validation {
            Ok(()) => {
                self.staged_unconfirmed = Some(block.clone());

                let vote_request = vote_request(
                    self.channel.clone(),
                    block.block_hash,
                    self.self_id,
                    siever_network::rpc::VoteCode::Yea,
                    String::new(),
                    self.fault_injection,
                );
                outputs.push(Output::Broadcast(vote_request));

                if self.variant == ConsensusVariant::Lft {
                    outputs.push(Output::StartVoteTimer {
                        block_hash: block.block_hash,
                        duration: TIMEOUT_FOR_PEER_VOTE,
                    });
                }
            }
            Err(reason) => {
                let vote_request = vote_request(
                    self.channel.clone(),
                    block.block_hash,
                    self.self_id,
                    siever_network::rpc::VoteCode::Nay,
                    reason.to_string(),
                    self.fault_injection,
                );
                outputs.push(Output::Broadcast(vote_request));
            }
        }

        outputs
    }

    /// Voter-role handling of `AnnounceConfirmedBlock`.
    pub fn on_announce_confirmed(&mut self, block_hash: Hash, body: Option<Block>) -> Vec<Output> {
        if let Some(staged) = &self.staged_unconfirmed {
            if staged.block_hash == block_hash {
                let block = staged.clone();
                self.staged_unconfirmed = None;
                return vec![Output::Commit(block)];
            }
        }

        if let Some(block) = body {
            return vec![Output::Commit(block)];
        }

        vec![Output::RequestHeightSync]
    }

    /// Vote-timer expiry for a staged block that never received a
    /// piggy-back confirmation (§4.6 point 5, LFT only).
    pub fn on_vote_timeout(&mut self, block_hash: Hash) -> Vec<Output> {
        if matches!(&self.staged_unconfirmed, Some(b) if b.block_hash == block_hash) {
            self.staged_unconfirmed = None;
            return vec![Output::RequestHeightSync];
        }
        vec![]
    }

    /// Leader-role: one tick of the block-generation loop.
    #[allow(clippy::too_many_arguments)]
    pub fn leader_tick(
        &mut self,
        last_height: u64,
        last_block_hash: Hash,
        timestamp: i64,
        signer: &dyn Signer,
        _connected_voter_count: usize,
    ) -> Vec<Output> {
        let mut outputs = Vec::new();

        if self.made_block_count >= LEADER_BLOCK_CREATION_LIMIT {
            outputs.push(Output::SurrenderLeadership);
            return outputs;
        }

        if self.candidates.is_open(last_height + 1) {
            // Still waiting on the current candidate; nothing new to propose.
            return outputs;
        }

        let txs = self.drain_tx_batch();
        if txs.is_empty() {
            // Nothing to propose this tick; quorum confirmations already go
            // out immediately from `on_vote`, so an empty block buys no
            // liveness and would only spam the channel every tick.
            return outputs;
        }

        let block = compose_block(
            &self.channel,
            last_height,
            last_block_hash,
            timestamp,
            self.self_id,
            txs,
            self.prior_candidate_confirmed,
            self.made_block_count + 1,
            signer,
        );

        self.made_block_count += 1;
        self.prior_candidate_confirmed = false;

        if self.candidates.open(block.clone()).is_ok() {
            outputs.push(Output::Broadcast(siever_network::rpc::RpcRequest::AnnounceUnconfirmedBlock {
                channel: self.channel.clone(),
                block_bytes: serde_json::to_vec(&block).unwrap_or_default(),
            }));
        }

        outputs
    }

    /// Leader-role: records an incoming vote and closes the candidate on
    /// quorum or rejection.
    pub fn on_vote(&mut self, block_hash: Hash, peer_id: Uuid, vote: TallyVote, connected_voter_count: usize) -> Vec<Output> {
        if self.candidates.record_vote(&block_hash, peer_id, vote).is_err() {
            return vec![];
        }

        let Ok(tally) = self.candidates.tally(&block_hash, connected_voter_count) else {
            return vec![];
        };

        if tally.has_quorum() {
            if let Some(block) = self.candidates.close(&block_hash, Outcome::Confirmed) {
                self.prior_candidate_confirmed = true;
                return vec![
                    Output::Broadcast(siever_network::rpc::RpcRequest::AnnounceConfirmedBlock {
                        channel: self.channel.clone(),
                        block_hash,
                        block_bytes: None,
                    }),
                    Output::Commit(block),
                ];
            }
        }

        vec![]
    }

    /// `BLOCK_VOTE_TIMEOUT` expiry on an open candidate: close as failed.
    /// Per §4.6 point 5, the consumed transactions are *not* requeued —
    /// a deliberate eventual-loss window. The actor shell looks up the
    /// candidate's hash from its own timer bookkeeping and calls this
    /// directly rather than going through an `Output`.
    pub fn close_failed(&mut self, block_hash: &Hash) {
        self.candidates.close(block_hash, Outcome::Rejected);
    }

    pub fn vote_deadline(&self) -> Duration {
        BLOCK_VOTE_TIMEOUT
    }

    fn drain_tx_batch(&mut self) -> Vec<Tx> {
        let mut batch = Vec::new();
        let mut size = 0usize;

        while batch.len() < MAX_BLOCK_TX_NUM {
            let Some(tx) = self.tx_queue.front() else { break };
            let tx_size = estimate_tx_size(tx);
            if size + tx_size > MAX_BLOCK_KBYTES {
                break;
            }
            size += tx_size;
            batch.push(self.tx_queue.pop_front().unwrap());
        }

        batch
    }
}

fn estimate_tx_size(tx: &Tx) -> usize {
    tx.data.len() + tx.signature.len() + tx.public_key.len() + 128
}

fn vote_request(
    channel: String,
    block_hash: Hash,
    self_id: Uuid,
    mut code: siever_network::rpc::VoteCode,
    mut message: String,
    fault_injection: FaultInjection,
) -> siever_network::rpc::RpcRequest {
    if fault_injection.always_nay_vote {
        code = siever_network::rpc::VoteCode::Nay;
        message = TEST_FAIL_VOTE_SIGN.to_string();
    }

    siever_network::rpc::RpcRequest::VoteUnconfirmedBlock {
        channel,
        block_hash,
        peer_id: self_id,
        group_id: String::new(),
        vote_code: code,
        message,
    }
}

/// Builds the next block on top of `(last_height, last_block_hash)`.
#[allow(clippy::too_many_arguments)]
pub fn compose_block(
    channel: &str,
    last_height: u64,
    last_block_hash: Hash,
    timestamp: i64,
    proposer: Uuid,
    txs: Vec<Tx>,
    prev_block_confirm: bool,
    made_block_count: u32,
    signer: &dyn Signer,
) -> Block {
    let leaves: Vec<Hash> = txs.iter().map(|t| t.tx_hash).collect();
    let merkle = siever_types::merkle_root(&leaves);
    let block_hash = Block::compute_hash(last_block_hash, merkle, timestamp, proposer);
    let signature = signer.sign_hash(block_hash.as_bytes());

    Block {
        block_hash,
        prev_block_hash: last_block_hash,
        height: last_height + 1,
        merkle_root: merkle,
        timestamp,
        peer_id: proposer,
        channel: channel.to_string(),
        confirmed_transactions: txs,
        block_type: BlockType::General,
        prev_block_confirm,
        made_block_count,
        is_divided_block: false,
        proposer_signature: signature,
    }
}

/// Voter-side validation (§4.6 point 3): schema/hash/merkle recomputation,
/// proposer signature, each tx signature, and chain continuity.
pub fn validate_block(
    block: &Block,
    last_height: u64,
    last_block_hash: Hash,
    proposer_public_key: &[u8],
    signer: &dyn Signer,
) -> Result<(), SievError> {
    if !block.has_valid_hash() {
        return Err(SievError::SchemaInvalid("block hash or merkle root recomputation mismatch".to_string()));
    }

    if !signer.verify_hash(proposer_public_key, block.block_hash.as_bytes(), &block.proposer_signature) {
        return Err(SievError::SignatureInvalid);
    }

    for tx in &block.confirmed_transactions {
        if !tx.has_valid_hash() {
            return Err(SievError::SchemaInvalid(format!("tx {} hash mismatch", tx.tx_hash)));
        }
        if !signer.verify_hash(&tx.public_key, tx.tx_hash.as_bytes(), &tx.signature) {
            return Err(SievError::SignatureInvalid);
        }
    }

    if block.prev_block_hash != last_block_hash {
        return Err(SievError::HashMismatch { height: block.height });
    }
    if block.height != last_height + 1 {
        return Err(SievError::HeightMismatch { expected: last_height + 1, actual: block.height });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use siever_crypto::SeedDerivedSigner;
    use siever_types::{genesis_block, TxType};

    fn signer() -> SeedDerivedSigner {
        SeedDerivedSigner::derive(b"consensus-test-seed", 0).unwrap()
    }

    fn sample_tx(signer: &dyn Signer, channel: &str) -> Tx {
        let peer_id = Uuid::new_v4();
        let timestamp = 1;
        let data = b"payload".to_vec();
        let tx_hash = Tx::compute_hash(channel, peer_id, timestamp, &data);
        let signature = signer.sign_hash(tx_hash.as_bytes());

        Tx {
            tx_hash,
            channel: channel.to_string(),
            peer_id,
            score_id: "score".to_string(),
            score_version: "1.0".to_string(),
            timestamp,
            data,
            signature,
            public_key: signer.public_key(),
            tx_type: TxType::Regular,
        }
    }

    #[test]
    fn leader_composes_block_from_queued_txs() {
        let signer = signer();
        let mut core = BlockManagerCore::new(Uuid::new_v4(), "chain1".to_string(), Role::Leader, ConsensusVariant::Siever);
        core.enqueue_tx(sample_tx(&signer, "chain1"));

        let genesis = genesis_block("chain1");
        let outputs = core.leader_tick(genesis.height, genesis.block_hash, 2, &signer, 3);

        assert!(matches!(outputs.as_slice(), [Output::Broadcast(_)]));
    }

    #[test]
    fn leader_surrenders_at_creation_limit() {
        let signer = signer();
        let mut core = BlockManagerCore::new(Uuid::new_v4(), "chain1".to_string(), Role::Leader, ConsensusVariant::Siever);
        for _ in 0..LEADER_BLOCK_CREATION_LIMIT {
            core.made_block_count = LEADER_BLOCK_CREATION_LIMIT;
        }

        let genesis = genesis_block("chain1");
        let outputs = core.leader_tick(genesis.height, genesis.block_hash, 2, &signer, 3);
        assert!(matches!(outputs.as_slice(), [Output::SurrenderLeadership]));
    }

    #[test]
    fn validate_block_rejects_wrong_height() {
        let signer = signer();
        let genesis = genesis_block("chain1");
        let mut block = genesis.clone();
        block.height = 5;

        let err = validate_block(&block, genesis.height, genesis.block_hash, &signer.public_key(), &signer).unwrap_err();
        assert!(matches!(err, SievError::HashMismatch { .. }) || matches!(err, SievError::SchemaInvalid(_)));
    }

    #[test]
    fn voter_commits_on_piggyback_confirmation() {
        let mut core = BlockManagerCore::new(Uuid::new_v4(), "chain1".to_string(), Role::Voter, ConsensusVariant::Siever);
        let signer = signer();
        let genesis = genesis_block("chain1");

        let pending = compose_block("chain1", genesis.height, genesis.block_hash, 2, Uuid::new_v4(), vec![], false, 1, &signer);

        let mut announce = compose_block("chain1", pending.height, pending.block_hash, 3, Uuid::new_v4(), vec![], true, 1, &signer);
        announce.prev_block_confirm = true;
        announce.prev_block_hash = pending.block_hash;

        let announce_hash = announce.block_hash;
        let outputs = core.on_announce_unconfirmed(announce, &signer, genesis.height, genesis.block_hash, Some(&pending), &signer.public_key());

        // The piggy-backed previous block commits, and the newly-announced
        // block is still validated/staged/voted on rather than discarded.
        assert!(matches!(outputs.first(), Some(Output::Commit(b)) if b.block_hash == pending.block_hash));
        assert!(matches!(outputs.get(1), Some(Output::Broadcast(_))));
        assert_eq!(outputs.len(), 2);
        assert_eq!(core.staged_unconfirmed().map(|b| b.block_hash), Some(announce_hash));
    }

    #[test]
    fn voter_requests_sync_on_missing_piggyback_target() {
        let mut core = BlockManagerCore::new(Uuid::new_v4(), "chain1".to_string(), Role::Voter, ConsensusVariant::Siever);
        let signer = signer();
        let genesis = genesis_block("chain1");

        let mut announce = compose_block("chain1", genesis.height, genesis.block_hash, 2, Uuid::new_v4(), vec![], true, 1, &signer);
        announce.prev_block_confirm = true;

        let outputs = core.on_announce_unconfirmed(announce, &signer, genesis.height, genesis.block_hash, None, &signer.public_key());
        assert!(matches!(outputs.as_slice(), [Output::RequestHeightSync]));
    }

    #[test]
    fn role_change_resets_made_block_count() {
        let mut core = BlockManagerCore::new(Uuid::new_v4(), "chain1".to_string(), Role::Leader, ConsensusVariant::Siever);
        core.made_block_count = 42;
        core.set_role(Role::Voter);
        assert_eq!(core.made_block_count, 0);
        assert_eq!(core.role, Role::Voter);
    }

    #[test]
    fn voter_votes_nay_on_wrong_proposer_key() {
        let mut core = BlockManagerCore::new(Uuid::new_v4(), "chain1".to_string(), Role::Voter, ConsensusVariant::Siever);
        let signer = signer();
        let impostor = SeedDerivedSigner::derive(b"impostor-seed", 0).unwrap();
        let genesis = genesis_block("chain1");

        let block = compose_block("chain1", genesis.height, genesis.block_hash, 2, Uuid::new_v4(), vec![], false, 1, &signer);

        let outputs = core.on_announce_unconfirmed(block, &signer, genesis.height, genesis.block_hash, None, &impostor.public_key());

        assert!(core.staged_unconfirmed().is_none());
        match outputs.as_slice() {
            [Output::Broadcast(siever_network::rpc::RpcRequest::VoteUnconfirmedBlock { vote_code, .. })] => {
                assert_eq!(*vote_code, siever_network::rpc::VoteCode::Nay);
            }
            other => panic!("expected a single nay vote broadcast, got {other:?}"),
        }
    }
}
