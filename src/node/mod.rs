// Node runtime
//
// A `Node` owns one chain, one mempool and one peer set, plus the background
// services its role allows. Everything is reached through an `Arc<Node>`
// shared by the HTTP handlers and the service loops.

pub mod mining;
pub mod rewards;
pub mod role;
pub mod service;
pub mod sync;
pub mod transfer;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use utoipa::ToSchema;

use crate::blockchain::ledger::{self, Balance, BalanceSheet, History, HistoryFilter};
use crate::blockchain::pow::{self, PowEngine};
use crate::blockchain::storage::{NodeStorage, StorageError};
use crate::blockchain::{
    Address, Block, Blockchain, ChainIntegrityError, CryptoError, Mempool, Transaction,
    TransactionError, Wallet,
};
use crate::config::Settings;
use crate::network::{HttpPeerClient, PeerClient, PeerError, PeerSet};
use crate::registry::{Registry, RegistryError};

pub use rewards::{RewardRecord, RewardStatus};
pub use role::{AuthorizationError, Capability, NodeRole};
pub use service::{BackgroundService, ServiceState, StopSignal};
pub use sync::{BlockReceipt, ReceiptStatus, SyncReport};
pub use transfer::Admission;

/// Errors surfaced by node operations
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    ChainIntegrity(#[from] ChainIntegrityError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Chain and mempool, guarded together so that appends, chain swaps and
/// mempool edits are atomic with respect to each other
#[derive(Debug)]
pub struct LedgerState {
    pub chain: Blockchain,
    pub mempool: Mempool,
}

/// Snapshot of node counters for `/stats`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeStats {
    pub role: NodeRole,
    pub total_blocks: usize,
    pub total_transactions: usize,
    pub total_supply: f64,
    pub difficulty: usize,
    pub pending_transactions: usize,
    pub peers: usize,
    pub blocks_mined: u64,
    pub mining: ServiceState,
    pub auto_transfer: ServiceState,
    pub sync: ServiceState,
    pub uptime_seconds: i64,
}

/// Every address with a non-zero confirmed balance
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceReport {
    pub balances: BTreeMap<String, f64>,
    pub total_supply: f64,
}

pub struct Node {
    settings: Settings,
    role: NodeRole,
    wallet: Wallet,
    url: String,
    state: RwLock<LedgerState>,
    peers: RwLock<PeerSet>,
    rewards: DashMap<String, RewardRecord>,
    collection_address: RwLock<Option<Address>>,
    storage: Option<NodeStorage>,
    registry: Option<Registry>,
    client: Arc<dyn PeerClient>,
    engine: Arc<dyn PowEngine>,
    mining: BackgroundService,
    auto_transfer: BackgroundService,
    sync: BackgroundService,
    started_at: DateTime<Utc>,
    blocks_mined: AtomicU64,
    stopped: AtomicBool,
    shutdown: Notify,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("url", &self.url)
            .field("role", &self.role)
            .field("address", self.wallet.address())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Node`], restoring persisted state when storage is given
pub struct NodeBuilder {
    settings: Settings,
    wallet: Option<Wallet>,
    client: Option<Arc<dyn PeerClient>>,
    engine: Option<Arc<dyn PowEngine>>,
    storage: Option<NodeStorage>,
    registry: Option<Registry>,
}

impl NodeBuilder {
    pub fn wallet(mut self, wallet: Wallet) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn client(mut self, client: Arc<dyn PeerClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn PowEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn storage(mut self, storage: NodeStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Arc<Node>, NodeError> {
        let settings = self.settings;
        let role = settings.role();
        let url = settings.node_url();

        let wallet = match (self.wallet, &settings.node.private_key) {
            (Some(wallet), _) => wallet,
            (None, Some(key)) => Wallet::restore(key)?,
            (None, None) => Wallet::generate(),
        };

        let client = match self.client {
            Some(client) => client,
            None => Arc::new(
                HttpPeerClient::new(&settings.network)
                    .map_err(|e| NodeError::Internal(e.to_string()))?,
            ),
        };

        let engine = self
            .engine
            .unwrap_or_else(|| pow::select_engine(settings.mining.engine));

        let rules = settings.chain_rules();
        let mut chain = Blockchain::new(rules.clone());
        let mut peers = PeerSet::new(&url);
        let rewards = DashMap::new();

        if let Some(storage) = &self.storage {
            let blocks = storage.load_chain()?;
            if blocks.len() > 1 {
                match Blockchain::from_blocks(blocks, rules) {
                    Ok(restored) => {
                        info!("Loaded chain of length {} from storage", restored.len());
                        chain = restored;
                    }
                    Err(err) => warn!("Stored chain is invalid, starting from genesis: {}", err),
                }
            }

            for peer in storage.load_peers()? {
                if let Err(err) = peers.add(&peer) {
                    warn!("Ignoring stored peer {}: {}", peer, err);
                }
            }

            for record in storage.load_rewards::<RewardRecord>()? {
                rewards.insert(record.reward_id.clone(), record);
            }
        }

        let collection_address = match &settings.network.collection_address {
            Some(raw) => match raw.parse::<Address>() {
                Ok(address) => Some(address),
                Err(err) => {
                    warn!("Ignoring configured collection address: {}", err);
                    None
                }
            },
            None => None,
        };

        let node = Arc::new(Node {
            role,
            wallet,
            url,
            state: RwLock::new(LedgerState {
                chain,
                mempool: Mempool::new(),
            }),
            peers: RwLock::new(peers),
            rewards,
            collection_address: RwLock::new(collection_address),
            storage: self.storage,
            registry: self.registry,
            client,
            engine,
            mining: BackgroundService::new("mining"),
            auto_transfer: BackgroundService::new("auto-transfer"),
            sync: BackgroundService::new("peer-sync"),
            started_at: Utc::now(),
            blocks_mined: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            shutdown: Notify::new(),
            settings,
        });

        node.restore_mempool()?;
        node.refresh_rewards();

        info!(
            "Node {} ready as {} with wallet {} (engine: {})",
            node.url,
            node.role,
            node.wallet.address(),
            node.engine.name()
        );
        Ok(node)
    }
}

impl Node {
    pub fn builder(settings: Settings) -> NodeBuilder {
        NodeBuilder {
            settings,
            wallet: None,
            client: None,
            engine: None,
            storage: None,
            registry: None,
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn address(&self) -> &Address {
        self.wallet.address()
    }

    /// Base URL peers use to reach this node
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Name of the proof-of-work engine in use
    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn registry(&self) -> Option<&Registry> {
        self.registry.as_ref()
    }

    pub fn chain(&self) -> Vec<Block> {
        self.state.read().chain.blocks().to_vec()
    }

    pub fn chain_length(&self) -> usize {
        self.state.read().chain.len()
    }

    /// Chain length and a view of the tip, read under one lock
    pub fn chain_tip<T>(&self, view: impl FnOnce(&Block) -> T) -> (usize, T) {
        let state = self.state.read();
        (state.chain.len(), view(state.chain.tip()))
    }

    pub fn is_chain_valid(&self) -> bool {
        self.state.read().chain.is_valid()
    }

    pub fn mempool(&self) -> Vec<Transaction> {
        self.state.read().mempool.transactions().to_vec()
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.read().list()
    }

    pub fn balance(&self, address: &Address) -> Balance {
        let state = self.state.read();
        ledger::compute_balance(state.chain.blocks(), &state.mempool, address)
    }

    /// Confirmed balance minus pending outgoing transfers
    pub fn available_balance(&self, address: &Address) -> f64 {
        let state = self.state.read();
        ledger::available_balance(state.chain.blocks(), &state.mempool, address)
    }

    pub fn balances(&self) -> BalanceReport {
        let state = self.state.read();
        let sheet = BalanceSheet::from_chain(state.chain.blocks());

        BalanceReport {
            balances: sheet
                .to_sorted()
                .into_iter()
                .map(|(address, amount)| (address.0, amount))
                .collect(),
            total_supply: ledger::total_minted(state.chain.blocks()),
        }
    }

    pub fn history(&self, address: &Address, filter: HistoryFilter, include_pending: bool) -> History {
        let state = self.state.read();
        ledger::history(
            state.chain.blocks(),
            &state.mempool,
            address,
            filter,
            include_pending,
        )
    }

    pub fn stats(&self) -> NodeStats {
        let (total_blocks, total_transactions, total_supply, pending) = {
            let state = self.state.read();
            (
                state.chain.len(),
                state.chain.transaction_count(),
                ledger::total_minted(state.chain.blocks()),
                state.mempool.len(),
            )
        };

        NodeStats {
            role: self.role,
            total_blocks,
            total_transactions,
            total_supply,
            difficulty: self.settings.mining.difficulty,
            pending_transactions: pending,
            peers: self.peers.read().len(),
            blocks_mined: self.blocks_mined.load(Ordering::Relaxed),
            mining: self.mining.state(),
            auto_transfer: self.auto_transfer.state(),
            sync: self.sync.state(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
        }
    }

    /// Starts the services this node's role runs by default
    pub fn start_services(self: &Arc<Self>) {
        self.start_sync();

        if self.role.allows(Capability::Mine) && self.settings.mining.autostart {
            self.start_mining();
        }
        if self.role.allows(Capability::AutoTransfer) {
            self.start_auto_transfer();
        }
    }

    pub fn stop_services(&self) {
        self.mining.stop();
        self.auto_transfer.stop();
        self.sync.stop();
    }

    /// Writes chain, mempool, peers and reward records to storage
    pub fn save(&self) -> Result<(), NodeError> {
        let storage = match &self.storage {
            Some(storage) => storage,
            None => return Ok(()),
        };

        let (blocks, pending) = {
            let state = self.state.read();
            (
                state.chain.blocks().to_vec(),
                state.mempool.transactions().to_vec(),
            )
        };

        storage.save_chain(&blocks)?;
        storage.save_mempool(&pending)?;
        storage.save_peers(&self.peers())?;
        for record in self.rewards.iter() {
            storage.save_reward(record.key(), record.value())?;
        }
        storage.flush()?;

        info!("Saved chain of length {} to storage", blocks.len());
        Ok(())
    }

    /// Registers this node's wallet as active on its port
    pub fn claim_session(&self) -> Result<(), NodeError> {
        if let Some(registry) = &self.registry {
            registry.start_session(self.settings.node.port, self.address())?;
        }
        Ok(())
    }

    /// Stops services, saves state, releases the session and wakes
    /// [`Node::wait_for_shutdown`]. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down node {}", self.url);
        self.stop_services();

        if let Err(err) = self.save() {
            error!("Failed to save state during shutdown: {}", err);
        }
        if let Some(registry) = &self.registry {
            if let Err(err) = registry.end_session(self.settings.node.port) {
                error!("Failed to release session: {}", err);
            }
        }

        self.shutdown.notify_one();
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown.notified().await;
    }

    /// Persists the effects of a newly accepted block. Failures are logged.
    ///
    /// The state lock is held across the writes, so a chain swap either
    /// lands before (and the block is skipped) or is stored after.
    fn persist_block(&self, block: &Block) {
        if let Some(storage) = &self.storage {
            let state = self.state.read();
            let still_on_chain = state
                .chain
                .blocks()
                .get(block.index as usize)
                .map_or(false, |stored| stored.hash == block.hash);
            if !still_on_chain {
                warn!("Block {} was replaced before it was stored", block.index);
                return;
            }

            let result = storage
                .save_block(block)
                .and_then(|_| storage.save_mempool(state.mempool.transactions()))
                .and_then(|_| storage.flush());
            if let Err(err) = result {
                error!("Failed to persist block {}: {}", block.index, err);
            }
        }
    }

    /// Persists the whole chain after a swap. Failures are logged.
    fn persist_chain(&self) {
        if let Some(storage) = &self.storage {
            let state = self.state.read();
            let result = storage
                .save_chain(state.chain.blocks())
                .and_then(|_| storage.flush());
            if let Err(err) = result {
                error!("Failed to persist chain: {}", err);
            }
        }
    }

    /// Re-admits the stored mempool, dropping whatever no longer validates
    fn restore_mempool(&self) -> Result<(), NodeError> {
        let storage = match &self.storage {
            Some(storage) => storage,
            None => return Ok(()),
        };

        let mut restored = 0;
        for tx in storage.load_mempool()? {
            match self.admit_transaction(tx) {
                Ok(Admission::Accepted) => restored += 1,
                Ok(_) => {}
                Err(err) => warn!("Dropping stored pending transaction: {}", err),
            }
        }
        if restored > 0 {
            info!("Restored {} pending transactions", restored);
        }
        Ok(())
    }
}
