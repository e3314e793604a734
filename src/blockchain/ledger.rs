// Balance engine
//
// Balances are never stored. Every query replays the confirmed chain and, where
// asked, nets the mempool on top. O(chain length) per query.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::block::Block;
use super::crypto::Address;
use super::mempool::Mempool;
use super::transaction::{Transaction, TransactionKind};

/// Tolerance used when comparing replayed balances
pub const BALANCE_EPSILON: f64 = 1e-9;

/// Balance of one address
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Balance {
    /// Sum of confirmed credits minus confirmed debits
    pub confirmed: f64,

    /// Net effect of pending transactions
    pub pending_delta: f64,

    /// `confirmed + pending_delta`
    pub total: f64,
}

/// Running per-address balances built by replaying transactions
#[derive(Debug, Default, Clone)]
pub struct BalanceSheet {
    balances: HashMap<Address, f64>,
}

impl BalanceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays every transaction of `chain`
    pub fn from_chain(chain: &[Block]) -> Self {
        let mut sheet = Self::new();
        for block in chain {
            for tx in &block.transactions {
                sheet.apply(tx);
            }
        }
        sheet
    }

    /// Credits the receiver and debits the sender. Coinbase only credits.
    pub fn apply(&mut self, tx: &Transaction) {
        *self.balances.entry(tx.receiver.clone()).or_insert(0.0) += tx.amount;
        if let Some(sender) = &tx.sender {
            *self.balances.entry(sender.clone()).or_insert(0.0) -= tx.amount;
        }
    }

    /// Whether `tx`'s sender can cover it from this sheet
    pub fn can_afford(&self, tx: &Transaction) -> bool {
        match &tx.sender {
            Some(sender) => self.balance(sender) + BALANCE_EPSILON >= tx.amount,
            None => true,
        }
    }

    pub fn balance(&self, address: &Address) -> f64 {
        self.balances.get(address).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.balances.values().sum()
    }

    /// Non-empty balances sorted by address
    pub fn to_sorted(&self) -> BTreeMap<Address, f64> {
        self.balances
            .iter()
            .filter(|(_, amount)| amount.abs() > BALANCE_EPSILON)
            .map(|(address, amount)| (address.clone(), *amount))
            .collect()
    }
}

/// Balance of `address` with the mempool netted on top
pub fn compute_balance(chain: &[Block], mempool: &Mempool, address: &Address) -> Balance {
    let confirmed = BalanceSheet::from_chain(chain).balance(address);
    let pending_delta = mempool.pending_delta(address);

    Balance {
        confirmed,
        pending_delta,
        total: confirmed + pending_delta,
    }
}

/// What `address` may still spend: confirmed balance minus everything it has
/// pending outbound
pub fn available_balance(chain: &[Block], mempool: &Mempool, address: &Address) -> f64 {
    BalanceSheet::from_chain(chain).balance(address) - mempool.outgoing(address, None)
}

/// Sum of every coinbase amount in the chain
pub fn total_minted(chain: &[Block]) -> f64 {
    chain
        .iter()
        .flat_map(|block| block.transactions.iter())
        .filter(|tx| tx.is_coinbase())
        .map(|tx| tx.amount)
        .sum()
}

/// Which side of a transfer a history query is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HistoryFilter {
    #[default]
    All,
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Confirmed,
    Pending,
}

/// One transaction as seen from a single address
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    pub tx_id: String,
    pub tx_type: TransactionKind,
    pub direction: Direction,
    pub sender: Option<Address>,
    pub receiver: Address,
    pub amount: f64,
    #[schema(value_type = String)]
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub block_index: Option<u64>,
    pub status: EntryStatus,
}

/// Transaction history of one address, newest first
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct History {
    pub address: Address,
    pub transactions: Vec<HistoryEntry>,
    pub total_sent: f64,
    pub total_received: f64,
}

fn entry_for(
    tx: &Transaction,
    address: &Address,
    block_index: Option<u64>,
    filter: HistoryFilter,
) -> Option<HistoryEntry> {
    let direction = if tx.sender.as_ref() == Some(address) {
        Direction::Sent
    } else if &tx.receiver == address {
        Direction::Received
    } else {
        return None;
    };

    let wanted = match filter {
        HistoryFilter::All => true,
        HistoryFilter::Sent => direction == Direction::Sent,
        HistoryFilter::Received => direction == Direction::Received,
    };
    if !wanted {
        return None;
    }

    Some(HistoryEntry {
        tx_id: tx.tx_id.clone(),
        tx_type: tx.kind,
        direction,
        sender: tx.sender.clone(),
        receiver: tx.receiver.clone(),
        amount: tx.amount,
        timestamp: tx.timestamp,
        block_index,
        status: if block_index.is_some() {
            EntryStatus::Confirmed
        } else {
            EntryStatus::Pending
        },
    })
}

/// Collects every transaction touching `address`.
///
/// Pending entries come first, then confirmed ones from the newest block down.
pub fn history(
    chain: &[Block],
    mempool: &Mempool,
    address: &Address,
    filter: HistoryFilter,
    include_pending: bool,
) -> History {
    let mut transactions = Vec::new();

    if include_pending {
        transactions.extend(
            mempool
                .transactions()
                .iter()
                .rev()
                .filter_map(|tx| entry_for(tx, address, None, filter)),
        );
    }

    for block in chain.iter().rev() {
        transactions.extend(
            block
                .transactions
                .iter()
                .rev()
                .filter_map(|tx| entry_for(tx, address, Some(block.index), filter)),
        );
    }

    let total_of = |direction: Direction| -> f64 {
        transactions
            .iter()
            .filter(|entry| entry.direction == direction)
            .map(|entry| entry.amount)
            .sum()
    };
    let total_sent = total_of(Direction::Sent);
    let total_received = total_of(Direction::Received);

    History {
        address: address.clone(),
        transactions,
        total_sent,
        total_received,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Wallet;

    fn block(index: u64, transactions: Vec<Transaction>) -> Block {
        Block::candidate(index, transactions, String::new())
    }

    fn transfer(from: &Wallet, to: &Wallet, amount: f64) -> Transaction {
        let mut tx = Transaction::build(from.address().clone(), to.address().clone(), amount);
        tx.sign(from).unwrap();
        tx
    }

    #[test]
    fn test_replay_and_conservation() {
        let (miner, user) = (Wallet::generate(), Wallet::generate());
        let chain = vec![
            Block::genesis(),
            block(1, vec![Transaction::coinbase(miner.address().clone(), 10.0)]),
            block(
                2,
                vec![
                    Transaction::coinbase(miner.address().clone(), 10.0),
                    transfer(&miner, &user, 5.0),
                ],
            ),
        ];

        let sheet = BalanceSheet::from_chain(&chain);
        assert_eq!(sheet.balance(miner.address()), 15.0);
        assert_eq!(sheet.balance(user.address()), 5.0);
        assert_eq!(sheet.total(), total_minted(&chain));
    }

    #[test]
    fn test_compute_balance_nets_mempool() {
        let (miner, user) = (Wallet::generate(), Wallet::generate());
        let chain = vec![
            Block::genesis(),
            block(1, vec![Transaction::coinbase(miner.address().clone(), 20.0)]),
        ];
        let mut mempool = Mempool::new();
        mempool.insert(transfer(&miner, &user, 5.0));

        let balance = compute_balance(&chain, &mempool, miner.address());
        assert_eq!(balance.confirmed, 20.0);
        assert_eq!(balance.pending_delta, -5.0);
        assert_eq!(balance.total, 15.0);
        assert_eq!(available_balance(&chain, &mempool, miner.address()), 15.0);
        assert_eq!(compute_balance(&chain, &mempool, user.address()).confirmed, 0.0);
    }

    #[test]
    fn test_history_filters_and_totals() {
        let (miner, user) = (Wallet::generate(), Wallet::generate());
        let chain = vec![
            Block::genesis(),
            block(1, vec![Transaction::coinbase(miner.address().clone(), 10.0)]),
            block(
                2,
                vec![
                    Transaction::coinbase(miner.address().clone(), 10.0),
                    transfer(&miner, &user, 4.0),
                ],
            ),
        ];
        let mut mempool = Mempool::new();
        mempool.insert(transfer(&miner, &user, 1.0));

        let all = history(&chain, &mempool, miner.address(), HistoryFilter::All, true);
        assert_eq!(all.transactions.len(), 4);
        assert_eq!(all.transactions[0].status, EntryStatus::Pending);
        assert_eq!(all.transactions[1].block_index, Some(2));
        assert_eq!(all.total_sent, 5.0);
        assert_eq!(all.total_received, 20.0);

        let received = history(&chain, &mempool, user.address(), HistoryFilter::Received, false);
        assert_eq!(received.transactions.len(), 1);
        assert_eq!(received.transactions[0].direction, Direction::Received);
        assert_eq!(received.total_received, 4.0);
    }
}
