use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// Distinguishes ordinary client submissions from membership-announcement
/// transactions that back `peer_list` blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Regular,
    PeerList,
}

/// A signed transaction submitted to a channel.
///
/// `tx_hash` is computed as `H(channel || peer_id || timestamp || H(data))`
/// and the signature is over `tx_hash`, per the data model invariant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub tx_hash: Hash,
    pub channel: String,
    pub peer_id: uuid::Uuid,
    pub score_id: String,
    pub score_version: String,
    pub timestamp: i64,
    pub data: Vec<u8>,
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
    pub tx_type: TxType,
}

impl Tx {
    /// Computes the canonical hash a well-formed `Tx` must carry in `tx_hash`.
    pub fn compute_hash(channel: &str, peer_id: uuid::Uuid, timestamp: i64, data: &[u8]) -> Hash {
        let data_hash = Hash::digest(&[data]);
        Hash::digest(&[
            channel.as_bytes(),
            peer_id.as_bytes(),
            &timestamp.to_be_bytes(),
            data_hash.as_bytes(),
        ])
    }

    /// Returns whether `tx_hash` matches what `compute_hash` would produce.
    pub fn has_valid_hash(&self) -> bool {
        self.tx_hash == Self::compute_hash(&self.channel, self.peer_id, self.timestamp, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Tx {
        let peer_id = uuid::Uuid::nil();
        let data = b"hello".to_vec();
        let hash = Tx::compute_hash("chain1", peer_id, 1000, &data);
        Tx {
            tx_hash: hash,
            channel: "chain1".to_string(),
            peer_id,
            score_id: "score".to_string(),
            score_version: "0.1".to_string(),
            timestamp: 1000,
            data,
            signature: vec![],
            public_key: vec![],
            tx_type: TxType::Regular,
        }
    }

    #[test]
    fn valid_hash_round_trips() {
        let tx = sample_tx();
        assert!(tx.has_valid_hash());
    }

    #[test]
    fn tampered_data_invalidates_hash() {
        let mut tx = sample_tx();
        tx.data = b"tampered".to_vec();
        assert!(!tx.has_valid_hash());
    }
}
