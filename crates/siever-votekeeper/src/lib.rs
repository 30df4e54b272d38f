//! A leader's buffer of in-flight unconfirmed blocks and their vote tallies
//! (§4.5). At most one candidate is open per height; votes are recorded
//! per-voter idempotently, and quorum is checked against the set of
//! currently-connected voters supplied by the caller at tally time (this
//! crate has no notion of peer liveness of its own).

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use siever_types::constants::VOTING_RATIO;
use siever_types::{Block, Hash, SievError, SievResult};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Yea,
    Nay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Confirmed,
    Rejected,
}

/// `(yea, nay, total_voters)` as returned by `tally`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tally {
    pub yea: usize,
    pub nay: usize,
    pub total_voters: usize,
}

impl Tally {
    /// `yea / total_voters >= VOTING_RATIO` *and* `(yea + nay) / total_voters
    /// >= VOTING_RATIO` — enough of the connected set has weighed in, and
    /// enough of it said yes.
    pub fn has_quorum(&self) -> bool {
        if self.total_voters == 0 {
            return false;
        }
        let yea_ratio = self.yea as f64 / self.total_voters as f64;
        let participation_ratio = (self.yea + self.nay) as f64 / self.total_voters as f64;
        yea_ratio >= VOTING_RATIO && participation_ratio >= VOTING_RATIO
    }
}

struct Candidate {
    block: Block,
    votes: HashMap<Uuid, Vote>,
    #[allow(dead_code)]
    opened_at: Instant,
}

/// Owns at most one open candidate per height, per §3's data-model
/// invariant ("at most one CandidateBlock per leader per height").
#[derive(Default)]
pub struct CandidateBlocks {
    by_height: HashMap<u64, Candidate>,
}

impl CandidateBlocks {
    pub fn new() -> Self {
        CandidateBlocks::default()
    }

    /// Opens an empty vote tally for `block`. Fails with `SchemaInvalid` if
    /// a candidate at the same height is already open (the spec's
    /// *AlreadyOpen*, folded into the closed `SievError` set).
    pub fn open(&mut self, block: Block) -> SievResult<()> {
        if self.by_height.contains_key(&block.height) {
            return Err(SievError::DuplicateHeight { height: block.height });
        }
        self.by_height.insert(
            block.height,
            Candidate {
                block,
                votes: HashMap::new(),
                opened_at: Instant::now(),
            },
        );
        Ok(())
    }

    fn find_mut(&mut self, block_hash: &Hash) -> Option<&mut Candidate> {
        self.by_height.values_mut().find(|c| &c.block.block_hash == block_hash)
    }

    fn find(&self, block_hash: &Hash) -> Option<&Candidate> {
        self.by_height.values().find(|c| &c.block.block_hash == block_hash)
    }

    /// Records `peer_id`'s vote. Idempotent: a later vote from the same peer
    /// simply replaces its earlier one rather than being double-counted.
    pub fn record_vote(&mut self, block_hash: &Hash, peer_id: Uuid, vote: Vote) -> SievResult<()> {
        let candidate = self
            .find_mut(block_hash)
            .ok_or_else(|| SievError::SchemaInvalid(format!("no open candidate for {block_hash}")))?;
        candidate.votes.insert(peer_id, vote);
        Ok(())
    }

    /// Returns `(yea, nay, total_voters)` for the candidate at `block_hash`.
    pub fn tally(&self, block_hash: &Hash, total_voters: usize) -> SievResult<Tally> {
        let candidate = self
            .find(block_hash)
            .ok_or_else(|| SievError::SchemaInvalid(format!("no open candidate for {block_hash}")))?;

        let yea = candidate.votes.values().filter(|v| **v == Vote::Yea).count();
        let nay = candidate.votes.values().filter(|v| **v == Vote::Nay).count();
        Ok(Tally { yea, nay, total_voters })
    }

    /// Removes the candidate at `block_hash`. On `Outcome::Confirmed`,
    /// returns the block so the caller can forward it to `BlockStore`;
    /// `Outcome::Rejected` discards it.
    pub fn close(&mut self, block_hash: &Hash, outcome: Outcome) -> Option<Block> {
        let height = self.by_height.iter().find(|(_, c)| &c.block.block_hash == block_hash).map(|(h, _)| *h)?;
        let candidate = self.by_height.remove(&height)?;
        match outcome {
            Outcome::Confirmed => Some(candidate.block),
            Outcome::Rejected => None,
        }
    }

    pub fn is_open(&self, height: u64) -> bool {
        self.by_height.contains_key(&height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siever_types::genesis_block;

    fn candidate_block(height: u64) -> Block {
        let mut block = genesis_block("chain1");
        block.height = height;
        block.block_hash = Hash::digest(&[&height.to_be_bytes()]);
        block
    }

    #[test]
    fn open_rejects_second_candidate_at_same_height() {
        let mut cb = CandidateBlocks::new();
        cb.open(candidate_block(1)).unwrap();
        let err = cb.open(candidate_block(1)).unwrap_err();
        assert!(matches!(err, SievError::DuplicateHeight { height: 1 }));
    }

    #[test]
    fn record_vote_is_idempotent_per_peer() {
        let mut cb = CandidateBlocks::new();
        let block = candidate_block(1);
        let hash = block.block_hash;
        cb.open(block).unwrap();

        let peer = Uuid::new_v4();
        cb.record_vote(&hash, peer, Vote::Yea).unwrap();
        cb.record_vote(&hash, peer, Vote::Yea).unwrap();

        let tally = cb.tally(&hash, 4).unwrap();
        assert_eq!(tally.yea, 1);
        assert_eq!(tally.nay, 0);
    }

    #[test]
    fn later_vote_from_same_peer_replaces_earlier_one() {
        let mut cb = CandidateBlocks::new();
        let block = candidate_block(1);
        let hash = block.block_hash;
        cb.open(block).unwrap();

        let peer = Uuid::new_v4();
        cb.record_vote(&hash, peer, Vote::Yea).unwrap();
        cb.record_vote(&hash, peer, Vote::Nay).unwrap();

        let tally = cb.tally(&hash, 4).unwrap();
        assert_eq!(tally.yea, 0);
        assert_eq!(tally.nay, 1);
    }

    #[test]
    fn quorum_requires_both_yea_ratio_and_participation() {
        let tally = Tally { yea: 3, nay: 0, total_voters: 4 };
        assert!(tally.has_quorum());

        let low_participation = Tally { yea: 2, nay: 0, total_voters: 4 };
        assert!(!low_participation.has_quorum());

        let enough_participation_not_enough_yea = Tally { yea: 2, nay: 2, total_voters: 4 };
        assert!(!enough_participation_not_enough_yea.has_quorum());
    }

    #[test]
    fn close_confirmed_returns_block_and_clears_slot() {
        let mut cb = CandidateBlocks::new();
        let block = candidate_block(1);
        let hash = block.block_hash;
        cb.open(block.clone()).unwrap();

        let returned = cb.close(&hash, Outcome::Confirmed).unwrap();
        assert_eq!(returned.block_hash, block.block_hash);
        assert!(!cb.is_open(1));
    }

    #[test]
    fn close_rejected_discards_block() {
        let mut cb = CandidateBlocks::new();
        let block = candidate_block(1);
        let hash = block.block_hash;
        cb.open(block).unwrap();

        assert!(cb.close(&hash, Outcome::Rejected).is_none());
        assert!(!cb.is_open(1));
    }
}
