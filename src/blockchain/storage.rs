use std::path::Path;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use thiserror::Error;

use super::block::Block;
use super::transaction::Transaction;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// Per-node snapshot store: chain, mempool, peers and reward records
pub struct NodeStorage {
    /// The database instance
    db: Db,

    /// Blocks keyed by big-endian index
    blocks: Tree,

    /// Pending transactions keyed by arrival position
    mempool: Tree,

    /// Known peer URLs
    peers: Tree,

    /// Reward records keyed by reward id
    rewards: Tree,
}

impl std::fmt::Debug for NodeStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStorage").finish()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

/// Reads every value of `tree` in key order, skipping entries that no longer
/// decode as long as at least one entry does
fn decode_all<T: DeserializeOwned>(tree: &Tree, what: &str) -> Result<Vec<T>, StorageError> {
    let mut items = Vec::new();
    let mut failures = Vec::new();

    for result in tree.iter() {
        let (key, value) = result?;
        match bincode::deserialize::<T>(&value) {
            Ok(item) => items.push(item),
            Err(e) => failures.push(format!("{:?}: {}", key.as_ref(), e)),
        }
    }

    if !failures.is_empty() {
        if items.is_empty() {
            return Err(StorageError::DeserializationError(format!(
                "Failed to deserialize any {}: {}",
                what,
                failures.join(", ")
            )));
        }
        warn!(
            "Some {} could not be deserialized: {}",
            what,
            failures.join(", ")
        );
    }

    Ok(items)
}

/// Replaces the whole content of `tree` with `values`, keyed by position
fn rewrite<T: Serialize>(tree: &Tree, values: &[T]) -> Result<(), StorageError> {
    let mut batch = sled::Batch::default();
    for key in tree.iter().keys() {
        batch.remove(key?);
    }
    for (position, value) in values.iter().enumerate() {
        batch.insert((position as u64).to_be_bytes().to_vec(), encode(value)?);
    }
    tree.apply_batch(batch)?;
    Ok(())
}

impl NodeStorage {
    /// Opens (or creates) the node database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A throwaway database that lives only as long as the process
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks")?;
        let mempool = db.open_tree("mempool")?;
        let peers = db.open_tree("peers")?;
        let rewards = db.open_tree("rewards")?;

        Ok(Self {
            db,
            blocks,
            mempool,
            peers,
            rewards,
        })
    }

    /// Stores the whole chain, dropping blocks beyond its length
    pub fn save_chain(&self, chain: &[Block]) -> Result<(), StorageError> {
        rewrite(&self.blocks, chain)
    }

    /// Stores a single block under its index
    pub fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        self.blocks
            .insert(block.index.to_be_bytes(), encode(block)?)?;
        Ok(())
    }

    /// Loads the stored chain ordered by index
    pub fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        decode_all(&self.blocks, "blocks")
    }

    pub fn save_mempool(&self, transactions: &[Transaction]) -> Result<(), StorageError> {
        rewrite(&self.mempool, transactions)
    }

    pub fn load_mempool(&self) -> Result<Vec<Transaction>, StorageError> {
        decode_all(&self.mempool, "pending transactions")
    }

    pub fn save_peers(&self, peers: &[String]) -> Result<(), StorageError> {
        rewrite(&self.peers, peers)
    }

    pub fn load_peers(&self) -> Result<Vec<String>, StorageError> {
        decode_all(&self.peers, "peers")
    }

    /// Stores one reward record under its id
    pub fn save_reward<T: Serialize>(&self, reward_id: &str, record: &T) -> Result<(), StorageError> {
        self.rewards.insert(reward_id.as_bytes(), encode(record)?)?;
        Ok(())
    }

    pub fn load_rewards<T: DeserializeOwned>(&self) -> Result<Vec<T>, StorageError> {
        decode_all(&self.rewards, "reward records")
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
