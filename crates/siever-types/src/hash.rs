use std::fmt;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// A 32-byte SHA3-256 digest, used for both transaction and block hashes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(#[serde(with = "hex::serde")] pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha3_256::new();
        for part in parts {
            hasher.update(part);
        }
        Hash(hasher.finalize().into())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Computes the Merkle root of an ordered list of transaction hashes.
///
/// Empty input yields [`Hash::ZERO`]. A single leaf's root is its own hash.
/// Odd levels duplicate the last node, matching the common Bitcoin-style
/// construction.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }

    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().unwrap());
        }

        level = level
            .chunks(2)
            .map(|pair| Hash::digest(&[&pair[0].0, &pair[1].0]))
            .collect();
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_merkle_root_is_zero() {
        assert_eq!(merkle_root(&[]), Hash::ZERO);
    }

    #[test]
    fn single_leaf_root_is_itself() {
        let h = Hash::digest(&[b"tx1"]);
        assert_eq!(merkle_root(&[h]), h);
    }

    #[test]
    fn odd_number_of_leaves_duplicates_last() {
        let a = Hash::digest(&[b"a"]);
        let b = Hash::digest(&[b"b"]);
        let c = Hash::digest(&[b"c"]);

        let root_odd = merkle_root(&[a, b, c]);
        let root_padded = merkle_root(&[a, b, c, c]);
        assert_eq!(root_odd, root_padded);
    }

    #[test]
    fn hash_roundtrips_through_json() {
        let h = Hash::digest(&[b"round-trip"]);
        let json = serde_json::to_string(&h).unwrap();
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
