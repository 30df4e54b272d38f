use serde::{Deserialize, Serialize};

use crate::hash::{merkle_root, Hash};
use crate::tx::Tx;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    General,
    PeerList,
}

/// A proposed or committed block.
///
/// `block_hash = H(prev_block_hash || merkle_root || timestamp || peer_id)`.
/// Genesis is the block at `height == 0` with `prev_block_hash == Hash::ZERO`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub block_hash: Hash,
    pub prev_block_hash: Hash,
    pub height: u64,
    pub merkle_root: Hash,
    pub timestamp: i64,
    pub peer_id: uuid::Uuid,
    pub channel: String,
    pub confirmed_transactions: Vec<Tx>,
    pub block_type: BlockType,
    /// Piggy-back confirmation of the previous round's candidate, per the
    /// Siever/LFT consensus variants.
    pub prev_block_confirm: bool,
    /// The proposer's contiguous-proposal counter, reset on role change.
    pub made_block_count: u32,
    pub is_divided_block: bool,
    pub proposer_signature: Vec<u8>,
}

impl Block {
    pub fn compute_hash(
        prev_block_hash: Hash,
        merkle_root: Hash,
        timestamp: i64,
        peer_id: uuid::Uuid,
    ) -> Hash {
        Hash::digest(&[
            prev_block_hash.as_bytes(),
            merkle_root.as_bytes(),
            &timestamp.to_be_bytes(),
            peer_id.as_bytes(),
        ])
    }

    pub fn compute_merkle_root(&self) -> Hash {
        let leaves: Vec<Hash> = self.confirmed_transactions.iter().map(|t| t.tx_hash).collect();
        merkle_root(&leaves)
    }

    /// Re-derives `block_hash` and `merkle_root` from the block's own fields
    /// and compares them against what's stored, per data-model invariant 2.
    pub fn has_valid_hash(&self) -> bool {
        let expected_root = self.compute_merkle_root();
        if expected_root != self.merkle_root {
            return false;
        }

        let expected_hash = Self::compute_hash(
            self.prev_block_hash,
            self.merkle_root,
            self.timestamp,
            self.peer_id,
        );
        expected_hash == self.block_hash
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0 && self.prev_block_hash.is_zero()
    }

    /// Whether `self` is a valid direct successor of `prev`, per invariant 1.
    pub fn chains_from(&self, prev: &Block) -> bool {
        self.height == prev.height + 1 && self.prev_block_hash == prev.block_hash
    }
}

pub fn genesis_block(channel: &str) -> Block {
    let merkle_root = merkle_root(&[]);
    let timestamp = 0;
    let peer_id = uuid::Uuid::nil();
    let block_hash = Block::compute_hash(Hash::ZERO, merkle_root, timestamp, peer_id);

    Block {
        block_hash,
        prev_block_hash: Hash::ZERO,
        height: 0,
        merkle_root,
        timestamp,
        peer_id,
        channel: channel.to_string(),
        confirmed_transactions: vec![],
        block_type: BlockType::General,
        prev_block_confirm: false,
        made_block_count: 0,
        is_divided_block: false,
        proposer_signature: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_has_valid_hash_and_height() {
        let g = genesis_block("chain1");
        assert!(g.is_genesis());
        assert!(g.has_valid_hash());
    }

    #[test]
    fn successor_chains_from_genesis() {
        let g = genesis_block("chain1");
        let merkle = merkle_root(&[]);
        let peer_id = uuid::Uuid::nil();
        let timestamp = 1;
        let hash = Block::compute_hash(g.block_hash, merkle, timestamp, peer_id);

        let next = Block {
            block_hash: hash,
            prev_block_hash: g.block_hash,
            height: 1,
            merkle_root: merkle,
            timestamp,
            peer_id,
            channel: "chain1".to_string(),
            confirmed_transactions: vec![],
            block_type: BlockType::General,
            prev_block_confirm: true,
            made_block_count: 1,
            is_divided_block: false,
            proposer_signature: vec![],
        };

        assert!(next.chains_from(&g));
        assert!(next.has_valid_hash());
    }

    #[test]
    fn tampered_merkle_root_invalidates_hash() {
        let mut g = genesis_block("chain1");
        g.merkle_root = Hash::digest(&[b"bogus"]);
        assert!(!g.has_valid_hash());
    }
}
