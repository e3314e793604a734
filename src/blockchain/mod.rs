// Blockchain module
//
// Core ledger types and rules:
// - Wallets, addresses and signatures
// - Transactions and blocks
// - Proof of work engines
// - Chain validation, mempool and balance replay
// - Node-local persistence

pub mod block;
pub mod chain;
pub mod crypto;
pub mod ledger;
pub mod mempool;
pub mod pow;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, ChainIntegrityError, ChainRules};
pub use crypto::{Address, CryptoError, DigitalSignature, Wallet};
pub use mempool::Mempool;
pub use transaction::{Transaction, TransactionError, TransactionKind};
