use std::collections::HashSet;

use log::{debug, info};
use thiserror::Error;

use super::block::Block;
use super::ledger::{BalanceSheet, BALANCE_EPSILON};

/// Reasons a block or chain is refused
#[derive(Debug, Error, PartialEq)]
pub enum ChainIntegrityError {
    #[error("Chain is empty")]
    EmptyChain,

    #[error("Genesis block does not match the network genesis")]
    GenesisMismatch,

    #[error("Block {index} has index {found}")]
    IndexMismatch { index: u64, found: u64 },

    #[error("Block {index} does not link to its predecessor")]
    BrokenLink { index: u64 },

    #[error("Block {index} hash does not match its contents")]
    HashMismatch { index: u64 },

    #[error("Block {index} does not meet difficulty {difficulty}")]
    InsufficientWork { index: u64, difficulty: usize },

    #[error("Block {index} has an invalid coinbase: {reason}")]
    InvalidCoinbase { index: u64, reason: String },

    #[error("Block {index} carries {count} transactions, limit is {limit}")]
    TooManyTransactions { index: u64, count: usize, limit: usize },

    #[error("Block {index} transaction {tx_id} is invalid: {reason}")]
    InvalidTransaction {
        index: u64,
        tx_id: String,
        reason: String,
    },

    #[error("Transaction {tx_id} appears more than once")]
    DuplicateTransaction { tx_id: String },

    #[error("Block {index} transaction {tx_id} overdraws its sender")]
    Overdraft { index: u64, tx_id: String },
}

/// Consensus parameters every block is checked against
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRules {
    /// Required leading zero hex characters
    pub difficulty: usize,

    /// Exact coinbase amount of every block
    pub mining_reward: f64,

    /// Maximum non-coinbase transactions per block
    pub max_transactions_per_block: usize,
}

impl Default for ChainRules {
    fn default() -> Self {
        ChainRules {
            difficulty: 3,
            mining_reward: 10.0,
            max_transactions_per_block: 1,
        }
    }
}

impl ChainRules {
    /// Validates a whole chain from genesis
    pub fn validate_chain(&self, blocks: &[Block]) -> Result<(), ChainIntegrityError> {
        let genesis = blocks.first().ok_or(ChainIntegrityError::EmptyChain)?;
        if genesis != &Block::genesis() {
            return Err(ChainIntegrityError::GenesisMismatch);
        }

        let mut sheet = BalanceSheet::new();
        let mut seen = HashSet::new();

        for pair in blocks.windows(2) {
            self.check_block(&pair[1], &pair[0], &mut sheet, &mut seen)?;
        }

        Ok(())
    }

    pub fn is_valid_chain(&self, blocks: &[Block]) -> bool {
        match self.validate_chain(blocks) {
            Ok(()) => true,
            Err(err) => {
                debug!("Rejecting chain of length {}: {}", blocks.len(), err);
                false
            }
        }
    }

    /// Checks `block` as the successor of `previous`, applying its
    /// transactions to `sheet` and recording their ids in `seen`
    fn check_block(
        &self,
        block: &Block,
        previous: &Block,
        sheet: &mut BalanceSheet,
        seen: &mut HashSet<String>,
    ) -> Result<(), ChainIntegrityError> {
        let index = block.index;

        if index != previous.index + 1 {
            return Err(ChainIntegrityError::IndexMismatch {
                index: previous.index + 1,
                found: index,
            });
        }

        if block.previous_hash != previous.hash {
            return Err(ChainIntegrityError::BrokenLink { index });
        }

        if !block.has_consistent_hash() {
            return Err(ChainIntegrityError::HashMismatch { index });
        }

        if !block.meets_difficulty(self.difficulty) {
            return Err(ChainIntegrityError::InsufficientWork {
                index,
                difficulty: self.difficulty,
            });
        }

        let coinbase = block
            .coinbase()
            .ok_or_else(|| ChainIntegrityError::InvalidCoinbase {
                index,
                reason: "first transaction is not a coinbase".to_string(),
            })?;

        if (coinbase.amount - self.mining_reward).abs() > BALANCE_EPSILON {
            return Err(ChainIntegrityError::InvalidCoinbase {
                index,
                reason: format!(
                    "reward {} differs from {}",
                    coinbase.amount, self.mining_reward
                ),
            });
        }

        let user_count = block.transactions.len() - 1;
        if user_count > self.max_transactions_per_block {
            return Err(ChainIntegrityError::TooManyTransactions {
                index,
                count: user_count,
                limit: self.max_transactions_per_block,
            });
        }

        for (position, tx) in block.transactions.iter().enumerate() {
            let invalid = |reason: String| ChainIntegrityError::InvalidTransaction {
                index,
                tx_id: tx.tx_id.clone(),
                reason,
            };

            if position > 0 && tx.is_coinbase() {
                return Err(ChainIntegrityError::InvalidCoinbase {
                    index,
                    reason: "more than one coinbase".to_string(),
                });
            }

            tx.validate_structure().map_err(|e| invalid(e.to_string()))?;
            if !tx.is_coinbase() {
                tx.verify_signature().map_err(|e| invalid(e.to_string()))?;
            }

            if !seen.insert(tx.tx_id.clone()) {
                return Err(ChainIntegrityError::DuplicateTransaction {
                    tx_id: tx.tx_id.clone(),
                });
            }

            if !sheet.can_afford(tx) {
                return Err(ChainIntegrityError::Overdraft {
                    index,
                    tx_id: tx.tx_id.clone(),
                });
            }
            sheet.apply(tx);
        }

        Ok(())
    }
}

/// An ordered, validated sequence of blocks
#[derive(Debug, Clone)]
pub struct Blockchain {
    blocks: Vec<Block>,
    rules: ChainRules,
}

impl Blockchain {
    /// Creates a chain holding only the genesis block
    pub fn new(rules: ChainRules) -> Self {
        Blockchain {
            blocks: vec![Block::genesis()],
            rules,
        }
    }

    /// Adopts previously stored blocks after validating them
    pub fn from_blocks(blocks: Vec<Block>, rules: ChainRules) -> Result<Self, ChainIntegrityError> {
        rules.validate_chain(&blocks)?;
        Ok(Blockchain { blocks, rules })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn rules(&self) -> &ChainRules {
        &self.rules
    }

    pub fn difficulty(&self) -> usize {
        self.rules.difficulty
    }

    /// Gets the last block in the chain
    pub fn tip(&self) -> &Block {
        // The genesis block is never removed, so the chain is never empty.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn is_valid(&self) -> bool {
        self.rules.is_valid_chain(&self.blocks)
    }

    /// Appends a block after checking it against the current tip, including a
    /// fresh balance replay of the whole chain.
    pub fn try_append(&mut self, block: Block) -> Result<(), ChainIntegrityError> {
        let mut sheet = BalanceSheet::from_chain(&self.blocks);
        let mut seen = self.confirmed_tx_ids();

        self.rules
            .check_block(&block, self.tip(), &mut sheet, &mut seen)?;

        info!(
            "Appended block {} ({} transactions) {}",
            block.index,
            block.transactions.len(),
            block.hash
        );
        self.blocks.push(block);
        Ok(())
    }

    /// Replaces the local chain with `candidate` when it is valid and strictly
    /// longer. Returns whether the swap happened.
    pub fn replace_if_longer(&mut self, candidate: Vec<Block>) -> Result<bool, ChainIntegrityError> {
        if candidate.len() <= self.blocks.len() {
            return Ok(false);
        }

        self.rules.validate_chain(&candidate)?;
        info!(
            "Replacing chain of length {} with chain of length {}",
            self.blocks.len(),
            candidate.len()
        );
        self.blocks = candidate;
        Ok(true)
    }

    pub fn contains_tx(&self, tx_id: &str) -> bool {
        self.block_index_of(tx_id).is_some()
    }

    /// Index of the block holding `tx_id`
    pub fn block_index_of(&self, tx_id: &str) -> Option<u64> {
        self.blocks
            .iter()
            .find(|block| block.transactions.iter().any(|tx| tx.tx_id == tx_id))
            .map(|block| block.index)
    }

    pub fn confirmed_tx_ids(&self) -> HashSet<String> {
        self.blocks
            .iter()
            .flat_map(|block| block.transactions.iter())
            .map(|tx| tx.tx_id.clone())
            .collect()
    }

    /// Number of transactions across all blocks, coinbases included
    pub fn transaction_count(&self) -> usize {
        self.blocks.iter().map(|block| block.transactions.len()).sum()
    }
}
