//! Durable, append-only store of confirmed blocks and transactions for one
//! channel, backed by `redb`. `append` commits are synchronous and durable
//! before returning, per the §4.2 durability contract.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use siever_types::{Block, Hash, SievError, SievResult};
use thiserror::Error;

const BLOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("blocks");
const HEIGHTS: TableDefinition<u64, &str> = TableDefinition::new("heights");
const TX_INDEX: TableDefinition<&str, &[u8]> = TableDefinition::new("tx_index");
const INVOKE_RESULTS: TableDefinition<&str, &str> = TableDefinition::new("invoke_results");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const META_KEY: &str = "meta";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("underlying database error: {0}")]
    Db(String),
    #[error(transparent)]
    Sieve(#[from] SievError),
}

impl From<redb::Error> for StoreError {
    fn from(e: redb::Error) -> Self {
        StoreError::Db(e.to_string())
    }
}
impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::Db(e.to_string())
    }
}
impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::Db(e.to_string())
    }
}
impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::Db(e.to_string())
    }
}
impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::Db(e.to_string())
    }
}
impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::Db(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
struct Meta {
    last_height: Option<u64>,
    last_block_hash: Option<[u8; 32]>,
    total_tx: u64,
}

#[derive(Serialize, Deserialize)]
struct TxLocation {
    block_hash: [u8; 32],
    index: usize,
}

/// Append-only mapping `block_hash -> Block`, `height -> block_hash`,
/// `tx_hash -> (block_hash, index)`, and `invoke_result(tx_hash) -> JSON`,
/// with the running counters `last_block_hash`, `last_height`, `total_tx`.
///
/// Readers go through the same `redb::Database` handle and are serialized
/// against `append` by redb's own MVCC transactions, satisfying the §5
/// shared-resource policy without an extra lock — except for the in-memory
/// `meta` cache, which a `RwLock` protects so `last_height`/`total_tx` reads
/// never block on a write transaction's read set.
pub struct BlockStore {
    db: Database,
    path: PathBuf,
    meta: RwLock<Meta>,
}

impl BlockStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_owned();
        let db = Database::create(&path)?;

        {
            let tx = db.begin_write()?;
            tx.open_table(BLOCKS)?;
            tx.open_table(HEIGHTS)?;
            tx.open_table(TX_INDEX)?;
            tx.open_table(INVOKE_RESULTS)?;
            tx.open_table(META)?;
            tx.commit()?;
        }

        let mut store = BlockStore {
            db,
            path,
            meta: RwLock::new(Meta::default()),
        };
        store.rebuild()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_height(&self) -> Option<u64> {
        self.meta.read().unwrap().last_height
    }

    pub fn last_block_hash(&self) -> Option<Hash> {
        self.meta.read().unwrap().last_block_hash.map(Hash)
    }

    pub fn total_tx(&self) -> u64 {
        self.meta.read().unwrap().total_tx
    }

    /// Atomically appends `block`, updating the hash/height/tx indices and
    /// the running counters.
    ///
    /// Fails with `DuplicateHeight` if `block.height != last_height + 1`
    /// (genesis excepted) or `HashMismatch` if `block.prev_block_hash !=
    /// last_block_hash`.
    pub fn append(&self, block: &Block) -> StoreResult<()> {
        let expected_height = self.last_height().map(|h| h + 1).unwrap_or(0);
        if block.height != expected_height {
            return Err(SievError::DuplicateHeight { height: block.height }.into());
        }

        if let Some(last_hash) = self.last_block_hash() {
            if block.prev_block_hash != last_hash {
                return Err(SievError::HashMismatch { height: block.height }.into());
            }
        } else if !block.is_genesis() {
            return Err(SievError::HashMismatch { height: block.height }.into());
        }

        let hash_key = block.block_hash.to_string();
        let encoded = serde_json::to_vec(block).map_err(|e| StoreError::Db(e.to_string()))?;

        let write_tx = self.db.begin_write()?;
        {
            let mut blocks = write_tx.open_table(BLOCKS)?;
            blocks.insert(hash_key.as_str(), encoded.as_slice())?;

            let mut heights = write_tx.open_table(HEIGHTS)?;
            heights.insert(block.height, hash_key.as_str())?;

            let mut tx_index = write_tx.open_table(TX_INDEX)?;
            for (index, tx) in block.confirmed_transactions.iter().enumerate() {
                let location = TxLocation {
                    block_hash: block.block_hash.0,
                    index,
                };
                let encoded_loc =
                    serde_json::to_vec(&location).map_err(|e| StoreError::Db(e.to_string()))?;
                tx_index.insert(tx.tx_hash.to_string().as_str(), encoded_loc.as_slice())?;
            }

            let mut meta_table = write_tx.open_table(META)?;
            let mut meta = *self.meta.read().unwrap();
            meta.last_height = Some(block.height);
            meta.last_block_hash = Some(block.block_hash.0);
            meta.total_tx += block.confirmed_transactions.len() as u64;
            let meta_bytes = serde_json::to_vec(&meta).map_err(|e| StoreError::Db(e.to_string()))?;
            meta_table.insert(META_KEY, meta_bytes.as_slice())?;

            *self.meta.write().unwrap() = meta;
        }
        write_tx.commit()?;

        tracing::debug!(
            height = block.height,
            hash = %block.block_hash,
            txs = block.confirmed_transactions.len(),
            "appended block"
        );

        Ok(())
    }

    pub fn find_by_hash(&self, hash: &Hash) -> StoreResult<Option<Block>> {
        let read_tx = self.db.begin_read()?;
        let blocks = read_tx.open_table(BLOCKS)?;
        let Some(bytes) = blocks.get(hash.to_string().as_str())? else {
            return Ok(None);
        };
        let block = serde_json::from_slice(bytes.value()).map_err(|e| StoreError::Db(e.to_string()))?;
        Ok(Some(block))
    }

    pub fn find_by_height(&self, height: u64) -> StoreResult<Option<Block>> {
        let read_tx = self.db.begin_read()?;
        let heights = read_tx.open_table(HEIGHTS)?;
        let Some(hash_str) = heights.get(height)? else {
            return Ok(None);
        };
        let blocks = read_tx.open_table(BLOCKS)?;
        let Some(bytes) = blocks.get(hash_str.value())? else {
            return Ok(None);
        };
        let block = serde_json::from_slice(bytes.value()).map_err(|e| StoreError::Db(e.to_string()))?;
        Ok(Some(block))
    }

    /// Returns the confirmed block containing `tx_hash`, if any.
    pub fn find_tx(&self, tx_hash: &Hash) -> StoreResult<Option<Block>> {
        let read_tx = self.db.begin_read()?;
        let tx_index = read_tx.open_table(TX_INDEX)?;
        let Some(bytes) = tx_index.get(tx_hash.to_string().as_str())? else {
            return Ok(None);
        };
        let location: TxLocation =
            serde_json::from_slice(bytes.value()).map_err(|e| StoreError::Db(e.to_string()))?;
        drop(tx_index);

        let blocks = read_tx.open_table(BLOCKS)?;
        let Some(bytes) = blocks.get(Hash(location.block_hash).to_string().as_str())? else {
            return Ok(None);
        };
        let block = serde_json::from_slice(bytes.value()).map_err(|e| StoreError::Db(e.to_string()))?;
        Ok(Some(block))
    }

    /// Wipes every table. The *ClearAndResync* path (§4.2/§4.7): a corrupt
    /// store or a recursive Height-Sync mismatch deletes all local state and
    /// restarts sync from genesis, rather than attempting partial repair.
    pub fn clear(&mut self) -> StoreResult<()> {
        let write_tx = self.db.begin_write()?;
        {
            write_tx.open_table(BLOCKS)?.retain(|_, _| false)?;
            write_tx.open_table(HEIGHTS)?.retain(|_, _| false)?;
            write_tx.open_table(TX_INDEX)?.retain(|_, _| false)?;
            write_tx.open_table(INVOKE_RESULTS)?.retain(|_, _| false)?;
            let mut meta_table = write_tx.open_table(META)?;
            let meta = Meta::default();
            let bytes = serde_json::to_vec(&meta).map_err(|e| StoreError::Db(e.to_string()))?;
            meta_table.insert(META_KEY, bytes.as_slice())?;
        }
        write_tx.commit()?;

        *self.meta.write().unwrap() = Meta::default();
        tracing::warn!("block store cleared, will resync from genesis");
        Ok(())
    }

    pub fn put_invoke_result(&self, tx_hash: &Hash, result_json: &str) -> StoreResult<()> {
        let write_tx = self.db.begin_write()?;
        {
            let mut table = write_tx.open_table(INVOKE_RESULTS)?;
            table.insert(tx_hash.to_string().as_str(), result_json)?;
        }
        write_tx.commit()?;
        Ok(())
    }

    pub fn invoke_result(&self, tx_hash: &Hash) -> StoreResult<Option<String>> {
        let read_tx = self.db.begin_read()?;
        let table = read_tx.open_table(INVOKE_RESULTS)?;
        Ok(table.get(tx_hash.to_string().as_str())?.map(|v| v.value().to_string()))
    }

    /// Rebuilds `last_height`, `last_block_hash`, `total_tx` from the
    /// persisted entries. This is the single authoritative recovery path,
    /// run once at `open` and again any time the in-memory counters are
    /// suspected stale (e.g. after an external restore).
    pub fn rebuild(&mut self) -> StoreResult<()> {
        let read_tx = self.db.begin_read()?;
        let heights = read_tx.open_table(HEIGHTS)?;

        let mut last_height = None;
        let mut last_hash_str = None;
        let mut iter = heights.iter()?;
        while let Some(Ok((height, hash))) = iter.next() {
            last_height = Some(height.value());
            last_hash_str = Some(hash.value().to_string());
        }

        let mut total_tx = 0u64;
        let blocks = read_tx.open_table(BLOCKS)?;
        let mut iter = blocks.iter()?;
        while let Some(Ok((_, bytes))) = iter.next() {
            let block: Block =
                serde_json::from_slice(bytes.value()).map_err(|e| StoreError::Db(e.to_string()))?;
            total_tx += block.confirmed_transactions.len() as u64;
        }

        let last_block_hash = match last_hash_str {
            Some(s) => Some(parse_hash(&s)?),
            None => None,
        };

        let meta = Meta {
            last_height,
            last_block_hash,
            total_tx,
        };

        let write_tx = self.db.begin_write()?;
        {
            let mut table = write_tx.open_table(META)?;
            let bytes = serde_json::to_vec(&meta).map_err(|e| StoreError::Db(e.to_string()))?;
            table.insert(META_KEY, bytes.as_slice())?;
        }
        write_tx.commit()?;

        *self.meta.write().unwrap() = meta;

        tracing::info!(
            last_height = ?meta.last_height,
            total_tx = meta.total_tx,
            "rebuilt block store from persisted entries"
        );

        Ok(())
    }
}

fn parse_hash(hex_str: &str) -> StoreResult<[u8; 32]> {
    let bytes = hex::decode(hex_str).map_err(|e| StoreError::Db(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| StoreError::Db("malformed stored hash".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use siever_types::genesis_block;

    fn next_block(prev: &Block, txs: Vec<siever_types::Tx>) -> Block {
        let leaves: Vec<Hash> = txs.iter().map(|t| t.tx_hash).collect();
        let merkle = siever_types::merkle_root(&leaves);
        let timestamp = prev.timestamp + 1;
        let peer_id = uuid::Uuid::nil();
        let hash = Block::compute_hash(prev.block_hash, merkle, timestamp, peer_id);

        Block {
            block_hash: hash,
            prev_block_hash: prev.block_hash,
            height: prev.height + 1,
            merkle_root: merkle,
            timestamp,
            peer_id,
            channel: prev.channel.clone(),
            confirmed_transactions: txs,
            block_type: siever_types::BlockType::General,
            prev_block_confirm: true,
            made_block_count: 1,
            is_divided_block: false,
            proposer_signature: vec![],
        }
    }

    #[test]
    fn append_genesis_then_block_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("db")).unwrap();

        let genesis = genesis_block("chain1");
        store.append(&genesis).unwrap();
        assert_eq!(store.last_height(), Some(0));

        let b1 = next_block(&genesis, vec![]);
        store.append(&b1).unwrap();
        assert_eq!(store.last_height(), Some(1));
        assert_eq!(store.last_block_hash(), Some(b1.block_hash));

        assert_eq!(store.find_by_height(1).unwrap().unwrap().block_hash, b1.block_hash);
        assert_eq!(store.find_by_hash(&b1.block_hash).unwrap().unwrap().height, 1);
    }

    #[test]
    fn duplicate_height_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("db")).unwrap();
        let genesis = genesis_block("chain1");
        store.append(&genesis).unwrap();
        store.append(&genesis).unwrap_err();
    }

    #[test]
    fn hash_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("db")).unwrap();
        let genesis = genesis_block("chain1");
        store.append(&genesis).unwrap();

        let mut bogus = next_block(&genesis, vec![]);
        bogus.prev_block_hash = Hash::digest(&[b"not-genesis"]);
        bogus.block_hash =
            Block::compute_hash(bogus.prev_block_hash, bogus.merkle_root, bogus.timestamp, bogus.peer_id);

        let err = store.append(&bogus).unwrap_err();
        assert!(matches!(err, StoreError::Sieve(SievError::HashMismatch { .. })));
    }

    #[test]
    fn rebuild_round_trips_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let store = BlockStore::open(&path).unwrap();
            let genesis = genesis_block("chain1");
            store.append(&genesis).unwrap();
            let b1 = next_block(&genesis, vec![]);
            store.append(&b1).unwrap();
        }

        let mut reopened = BlockStore::open(&path).unwrap();
        assert_eq!(reopened.last_height(), Some(1));
        reopened.rebuild().unwrap();
        assert_eq!(reopened.last_height(), Some(1));
        assert_eq!(reopened.total_tx(), 0);
    }

    #[test]
    fn invoke_result_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("db")).unwrap();
        let tx_hash = Hash::digest(&[b"tx"]);
        store.put_invoke_result(&tx_hash, r#"{"status":"ok"}"#).unwrap();
        assert_eq!(
            store.invoke_result(&tx_hash).unwrap(),
            Some(r#"{"status":"ok"}"#.to_string())
        );
    }
}
