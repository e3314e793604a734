// API module
//
// This module contains the HTTP interface of a node: the common ledger and
// peer endpoints, role-gated miner and collection endpoints, and the wallet
// gateway.

pub mod auth;
pub mod collection;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod miner;
pub mod routes;

use utoipa::OpenApi;

// Re-export main components for easier access
pub use error::ApiError;
pub use routes::configure_routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::index,
        handlers::health,
        handlers::address,
        handlers::balance,
        handlers::balances,
        handlers::chain,
        handlers::mempool,
        handlers::stats,
        handlers::peers,
        handlers::add_peer,
        handlers::announce_peer,
        handlers::consensus,
        handlers::sync,
        handlers::transactions,
        handlers::transactions_for,
        handlers::transfer,
        handlers::submit_transaction,
        handlers::receive_transaction,
        handlers::receive_block,
        handlers::save,
        handlers::shutdown,
        miner::mine,
        miner::start_mining,
        miner::stop_mining,
        miner::mining_status,
        miner::start_auto_transfer,
        miner::stop_auto_transfer,
        miner::auto_transfer_status,
        collection::assign_reward,
        collection::reward_status,
        collection::rewards,
        gateway::create_wallet,
        gateway::wallet_balance,
        gateway::wallet_transactions,
        gateway::wallet_info,
        gateway::sessions,
        gateway::chain_info
    ),
    components(
        schemas(
            crate::blockchain::Block,
            crate::blockchain::Transaction,
            crate::blockchain::TransactionKind,
            crate::blockchain::Address,
            crate::blockchain::DigitalSignature,
            crate::blockchain::ledger::Balance,
            crate::blockchain::ledger::History,
            crate::blockchain::ledger::HistoryEntry,
            crate::blockchain::ledger::HistoryFilter,
            crate::blockchain::ledger::Direction,
            crate::blockchain::ledger::EntryStatus,
            crate::network::wire::ChainSnapshot,
            crate::network::wire::MempoolSnapshot,
            crate::network::wire::PeerList,
            crate::network::wire::AddressInfo,
            crate::network::wire::PeerAnnouncement,
            crate::network::ConsensusOutcome,
            crate::node::NodeRole,
            crate::node::Capability,
            crate::node::NodeStats,
            crate::node::BalanceReport,
            crate::node::ServiceState,
            crate::node::Admission,
            crate::node::BlockReceipt,
            crate::node::ReceiptStatus,
            crate::node::SyncReport,
            crate::node::RewardRecord,
            crate::node::RewardStatus,
            error::ErrorResponse,
            handlers::NodeInfo,
            handlers::HealthResponse,
            handlers::BalanceResponse,
            handlers::TransferRequest,
            handlers::TransactionResponse,
            handlers::AdmissionResponse,
            handlers::PeerResponse,
            handlers::MessageResponse,
            miner::ServiceResponse,
            miner::MiningStatus,
            miner::AutoTransferStatus,
            miner::MineResponse,
            collection::AssignRewardRequest,
            collection::AssignRewardResponse,
            gateway::CreateWalletRequest,
            gateway::CreateWalletResponse,
            gateway::WalletBalanceResponse,
            gateway::WalletTransactionsResponse,
            gateway::WalletStats,
            gateway::WalletInfoResponse,
            gateway::SessionInfo,
            gateway::SessionsResponse,
            gateway::LatestBlock,
            gateway::ChainInfoResponse
        )
    ),
    tags(
        (name = "carboncoin", description = "CarbonCoin node API")
    ),
    info(
        title = "CarbonCoin Node API",
        version = "0.1.0",
        description = "Ledger, peer, mining and reward endpoints of a CarbonCoin node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
pub struct ApiDoc;
