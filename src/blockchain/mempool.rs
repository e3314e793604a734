use std::collections::HashSet;

use super::crypto::Address;
use super::transaction::{Transaction, TransactionKind};

/// Pending transactions in arrival order, keyed by `tx_id`
#[derive(Debug, Default, Clone)]
pub struct Mempool {
    transactions: Vec<Transaction>,
    ids: HashSet<String>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.ids.contains(tx_id)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Adds a transaction. Returns false if its id is already pending.
    pub fn insert(&mut self, transaction: Transaction) -> bool {
        if !self.ids.insert(transaction.tx_id.clone()) {
            return false;
        }
        self.transactions.push(transaction);
        true
    }

    /// Removes every listed transaction, returning how many were dropped
    pub fn evict<'a, I>(&mut self, tx_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let doomed: HashSet<&str> = tx_ids
            .into_iter()
            .filter(|id| self.ids.contains(*id))
            .collect();

        if doomed.is_empty() {
            return 0;
        }

        self.transactions
            .retain(|tx| !doomed.contains(tx.tx_id.as_str()));
        for id in &doomed {
            self.ids.remove(*id);
        }
        doomed.len()
    }

    /// Keeps only the transactions for which `keep` returns true
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&Transaction) -> bool,
    {
        let before = self.transactions.len();
        let ids = &mut self.ids;
        self.transactions.retain(|tx| {
            let kept = keep(tx);
            if !kept {
                ids.remove(&tx.tx_id);
            }
            kept
        });
        before - self.transactions.len()
    }

    /// Net effect of pending transactions on `address`
    pub fn pending_delta(&self, address: &Address) -> f64 {
        let mut delta = 0.0;
        for tx in &self.transactions {
            if &tx.receiver == address {
                delta += tx.amount;
            }
            if tx.sender.as_ref() == Some(address) {
                delta -= tx.amount;
            }
        }
        delta
    }

    /// Total pending outgoing amount for `address`, optionally limited to one kind
    pub fn outgoing(&self, address: &Address, kind: Option<TransactionKind>) -> f64 {
        self.transactions
            .iter()
            .filter(|tx| tx.sender.as_ref() == Some(address))
            .filter(|tx| kind.map_or(true, |kind| tx.kind == kind))
            .map(|tx| tx.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Wallet;

    fn transfer(from: &Wallet, to: &Wallet, amount: f64) -> Transaction {
        let mut tx = Transaction::build(from.address().clone(), to.address().clone(), amount);
        tx.sign(from).unwrap();
        tx
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let (a, b) = (Wallet::generate(), Wallet::generate());
        let tx = transfer(&a, &b, 1.0);
        let mut pool = Mempool::new();

        assert!(pool.insert(tx.clone()));
        assert!(!pool.insert(tx));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_evict_and_retain() {
        let (a, b) = (Wallet::generate(), Wallet::generate());
        let first = transfer(&a, &b, 1.0);
        let second = transfer(&a, &b, 2.0);
        let mut pool = Mempool::new();
        pool.insert(first.clone());
        pool.insert(second.clone());

        assert_eq!(pool.evict([first.tx_id.as_str()]), 1);
        assert!(!pool.contains(&first.tx_id));
        assert_eq!(pool.transactions()[0].tx_id, second.tx_id);

        assert_eq!(pool.retain(|tx| tx.amount > 5.0), 1);
        assert!(pool.is_empty());
        assert!(pool.insert(second));
    }

    #[test]
    fn test_pending_accounting() {
        let (a, b, c) = (Wallet::generate(), Wallet::generate(), Wallet::generate());
        let mut pool = Mempool::new();
        pool.insert(transfer(&a, &b, 4.0));
        pool.insert(transfer(&c, &a, 1.5));

        let mut auto = Transaction::auto_transfer(a.address().clone(), c.address().clone(), 2.0);
        auto.sign(&a).unwrap();
        pool.insert(auto);

        assert_eq!(pool.pending_delta(a.address()), -4.5);
        assert_eq!(pool.pending_delta(b.address()), 4.0);
        assert_eq!(pool.outgoing(a.address(), None), 6.0);
        assert_eq!(
            pool.outgoing(a.address(), Some(TransactionKind::AutoTransfer)),
            2.0
        );
    }
}
