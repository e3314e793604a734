use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use super::pow::{self, MiningTemplate, PowEngine, Proof};
use super::transaction::Transaction;

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Transactions in this block, coinbase first
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Proof of work
    pub nonce: u64,

    /// Hash of the current block
    pub hash: String,
}

impl Block {
    /// The fixed first block every node starts from
    pub fn genesis() -> Self {
        let block = Block {
            index: 0,
            timestamp: DateTime::<Utc>::default(),
            transactions: Vec::new(),
            previous_hash: "0".to_string(),
            nonce: 0,
            hash: String::new(),
        };

        let hash = block.calculate_hash();
        Block { hash, ..block }
    }

    /// Creates an unmined block on top of `previous_hash`
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `transactions` - The transactions to include, coinbase first
    /// * `previous_hash` - The hash of the previous block
    pub fn candidate(index: u64, transactions: Vec<Transaction>, previous_hash: String) -> Self {
        Block {
            index,
            timestamp: Utc::now(),
            transactions,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        }
    }

    /// Canonical serialization of every hashed field except the nonce.
    ///
    /// Keys are emitted in sorted order: index, nonce, previous_hash,
    /// timestamp, transactions.
    pub fn template(&self) -> MiningTemplate {
        let prefix = format!("{{\"index\":{},\"nonce\":", self.index);
        let suffix = format!(
            ",\"previous_hash\":{},\"timestamp\":{},\"transactions\":{}}}",
            json!(self.previous_hash),
            json!(self.timestamp),
            json!(self.transactions),
        );

        MiningTemplate::new(prefix, suffix)
    }

    /// Calculates the hash of the block
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the block as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        self.template().digest_at(self.nonce)
    }

    /// Runs the nonce search and returns the sealed block, or `None` when the
    /// search was stopped.
    pub fn mine(
        self,
        engine: &dyn PowEngine,
        difficulty: usize,
        stop: &AtomicBool,
    ) -> Option<Block> {
        let template = self.template();
        let Proof { hash, nonce } = engine.mine(&template, difficulty, 0, stop)?;

        Some(Block { nonce, hash, ..self })
    }

    /// Checks the stored hash against the block's contents
    pub fn has_consistent_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        pow::meets_difficulty(&self.hash, difficulty)
    }

    /// The block's reward transaction, if it leads the block
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Transactions other than the coinbase
    pub fn user_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|tx| !tx.is_coinbase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::pow::PortableEngine;
    use crate::blockchain::Wallet;

    fn coinbase() -> Transaction {
        Transaction::coinbase(Wallet::generate().address().clone(), 10.0)
    }

    #[test]
    fn test_genesis_is_fixed() {
        let a = Block::genesis();
        let b = Block::genesis();

        assert_eq!(a, b);
        assert_eq!(a.index, 0);
        assert_eq!(a.previous_hash, "0");
        assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn test_calculate_hash() {
        let block = Block::candidate(1, vec![coinbase()], "previous_hash".to_string());

        let hash = block.calculate_hash();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, block.calculate_hash());
    }

    #[test]
    fn test_template_payload_is_sorted_json() {
        let block = Block::candidate(3, vec![coinbase()], "abc".to_string());
        let payload = block.template().payload(7);
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value["index"], 3);
        assert_eq!(value["nonce"], 7);
        assert_eq!(value["previous_hash"], "abc");
        assert_eq!(value["transactions"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_mine_block() {
        let stop = AtomicBool::new(false);
        let block = Block::candidate(1, vec![coinbase()], Block::genesis().hash)
            .mine(&PortableEngine, 2, &stop)
            .unwrap();

        assert!(block.meets_difficulty(2));
        assert!(block.has_consistent_hash());
        assert!(block.coinbase().is_some());
    }

    #[test]
    fn test_tampering_changes_hash() {
        let stop = AtomicBool::new(false);
        let block = Block::candidate(1, vec![coinbase()], Block::genesis().hash)
            .mine(&PortableEngine, 1, &stop)
            .unwrap();

        let mut tampered = block.clone();
        tampered.nonce += 1;
        assert!(!tampered.has_consistent_hash());

        let mut tampered = block;
        tampered.transactions[0].amount = 1_000.0;
        assert!(!tampered.has_consistent_hash());
    }
}
