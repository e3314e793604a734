// Wallet creation and read-only queries for external consumers

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::error::ApiError;
use super::handlers::NodeData;
use crate::blockchain::ledger::{HistoryEntry, HistoryFilter};
use crate::blockchain::{Address, Wallet};
use crate::node::NodeRole;

const MIN_LABEL_LEN: usize = 3;
const MAX_LABEL_LEN: usize = 254;
const DEFAULT_HISTORY_LIMIT: usize = 50;
const RECENT_TRANSACTIONS: usize = 10;

/// Request for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateWalletRequest {
    /// User name or email, used as the wallet's unique label
    #[serde(rename = "userName")]
    pub user_name: String,

    /// External user id; accepted but not stored
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateWalletResponse {
    pub success: bool,
    pub wallet_address: Address,
    /// Hex private key. It is shown once and must be kept by the caller.
    pub private_key: String,
    pub label: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WalletQuery {
    /// Wallet address
    pub wallet: Option<String>,
    /// Maximum number of transactions to return
    pub limit: Option<usize>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletBalanceResponse {
    pub success: bool,
    pub wallet: Address,
    /// Confirmed balance
    pub balance: f64,
    pub symbol: String,
    pub chain_length: usize,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletTransactionsResponse {
    pub success: bool,
    pub wallet: Address,
    pub transactions: Vec<HistoryEntry>,
    pub count: usize,
    pub chain_length: usize,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletStats {
    pub total_transactions: usize,
    pub total_received: f64,
    pub total_sent: f64,
}

/// Balance, totals and session status of a wallet
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletInfoResponse {
    pub success: bool,
    pub wallet: Address,
    pub balance: f64,
    pub symbol: String,
    /// Whether a node is currently running with this wallet
    pub is_active: bool,
    pub active_port: Option<u16>,
    pub stats: WalletStats,
    pub recent_transactions: Vec<HistoryEntry>,
    pub chain_length: usize,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct SessionInfo {
    pub port: u16,
    pub wallet: Address,
    #[serde(rename = "type")]
    pub role: NodeRole,
}

/// Running user and collection nodes
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SessionsResponse {
    pub success: bool,
    pub sessions: Vec<SessionInfo>,
    pub count: usize,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LatestBlock {
    pub index: u64,
    pub hash: String,
    #[schema(value_type = String)]
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub transactions_count: usize,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainInfoResponse {
    pub success: bool,
    pub chain_length: usize,
    pub latest_block: LatestBlock,
}

/// Lowercased, trimmed label of acceptable length
fn normalize_label(raw: &str) -> Result<String, ApiError> {
    let label = raw.trim().to_lowercase();
    let length = label.chars().count();

    if length < MIN_LABEL_LEN {
        return Err(ApiError::Validation(format!(
            "userName must be at least {} characters",
            MIN_LABEL_LEN
        )));
    }
    if length > MAX_LABEL_LEN {
        return Err(ApiError::Validation(format!(
            "userName must be at most {} characters",
            MAX_LABEL_LEN
        )));
    }
    Ok(label)
}

fn wallet_param(query: &WalletQuery) -> Result<Address, ApiError> {
    let raw = query
        .wallet
        .as_deref()
        .ok_or_else(|| ApiError::Validation("missing 'wallet' parameter".to_string()))?;
    Ok(raw.parse()?)
}

/// Create a labelled wallet
///
/// The wallet is stored in the registry but not started on any port.
#[utoipa::path(
    post,
    path = "/create_wallet",
    request_body = CreateWalletRequest,
    responses(
        (status = 201, description = "Wallet created", body = CreateWalletResponse),
        (status = 400, description = "Invalid userName", body = ErrorResponse),
        (status = 409, description = "userName already has a wallet", body = ErrorResponse)
    )
)]
pub async fn create_wallet(
    node: NodeData,
    request: web::Json<CreateWalletRequest>,
) -> Result<HttpResponse, ApiError> {
    let label = normalize_label(&request.user_name)?;
    let registry = node
        .registry()
        .ok_or_else(|| ApiError::Internal("wallet registry is not configured".to_string()))?;

    let wallet = Wallet::generate();
    let record = registry.register_wallet(&wallet, Some(label.clone()))?;

    Ok(HttpResponse::Created().json(CreateWalletResponse {
        success: true,
        wallet_address: record.address,
        private_key: record.private_key,
        label,
    }))
}

/// Confirmed balance of a wallet
#[utoipa::path(
    get,
    path = "/api/balance",
    params(WalletQuery),
    responses(
        (status = 200, description = "Wallet balance", body = WalletBalanceResponse),
        (status = 400, description = "Missing or malformed wallet", body = ErrorResponse)
    )
)]
pub async fn wallet_balance(
    node: NodeData,
    query: web::Query<WalletQuery>,
) -> Result<HttpResponse, ApiError> {
    let wallet = wallet_param(&query)?;
    let balance = node.balance(&wallet);

    Ok(HttpResponse::Ok().json(WalletBalanceResponse {
        success: true,
        balance: balance.confirmed,
        symbol: node.settings().coin.symbol.clone(),
        chain_length: node.chain_length(),
        wallet,
    }))
}

/// Confirmed transactions of a wallet, newest first
#[utoipa::path(
    get,
    path = "/api/transactions",
    params(WalletQuery),
    responses(
        (status = 200, description = "Wallet transactions", body = WalletTransactionsResponse),
        (status = 400, description = "Missing or malformed wallet", body = ErrorResponse)
    )
)]
pub async fn wallet_transactions(
    node: NodeData,
    query: web::Query<WalletQuery>,
) -> Result<HttpResponse, ApiError> {
    let wallet = wallet_param(&query)?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    let mut transactions = node.history(&wallet, HistoryFilter::All, false).transactions;
    transactions.truncate(limit);

    Ok(HttpResponse::Ok().json(WalletTransactionsResponse {
        success: true,
        count: transactions.len(),
        chain_length: node.chain_length(),
        transactions,
        wallet,
    }))
}

/// Balance, totals, recent transactions and session status of a wallet
#[utoipa::path(
    get,
    path = "/api/wallet/info",
    params(WalletQuery),
    responses(
        (status = 200, description = "Wallet information", body = WalletInfoResponse),
        (status = 400, description = "Missing or malformed wallet", body = ErrorResponse)
    )
)]
pub async fn wallet_info(
    node: NodeData,
    query: web::Query<WalletQuery>,
) -> Result<HttpResponse, ApiError> {
    let wallet = wallet_param(&query)?;
    let balance = node.balance(&wallet);
    let history = node.history(&wallet, HistoryFilter::All, false);

    let active_port = match node.registry() {
        Some(registry) => registry
            .sessions()?
            .into_iter()
            .find(|(_, address)| *address == wallet)
            .map(|(port, _)| port),
        None => None,
    };

    let stats = WalletStats {
        total_transactions: history.transactions.len(),
        total_received: history.total_received,
        total_sent: history.total_sent,
    };
    let mut recent_transactions = history.transactions;
    recent_transactions.truncate(RECENT_TRANSACTIONS);

    Ok(HttpResponse::Ok().json(WalletInfoResponse {
        success: true,
        balance: balance.confirmed,
        symbol: node.settings().coin.symbol.clone(),
        is_active: active_port.is_some(),
        active_port,
        stats,
        recent_transactions,
        chain_length: node.chain_length(),
        wallet,
    }))
}

/// Active sessions of user and collection nodes; miners are left out
#[utoipa::path(
    get,
    path = "/api/sessions",
    responses(
        (status = 200, description = "Active sessions", body = SessionsResponse),
        (status = 500, description = "Registry unavailable", body = ErrorResponse)
    )
)]
pub async fn sessions(node: NodeData) -> Result<HttpResponse, ApiError> {
    let registry = node
        .registry()
        .ok_or_else(|| ApiError::Internal("wallet registry is not configured".to_string()))?;
    let network = &node.settings().network;

    let sessions: Vec<SessionInfo> = registry
        .sessions()?
        .into_iter()
        .map(|(port, wallet)| SessionInfo {
            port,
            wallet,
            role: NodeRole::from_port(port, &network.miner_ports, network.collection_port),
        })
        .filter(|session| session.role != NodeRole::Miner)
        .collect();

    Ok(HttpResponse::Ok().json(SessionsResponse {
        success: true,
        count: sessions.len(),
        sessions,
    }))
}

/// Length of the chain and a summary of its tip
#[utoipa::path(
    get,
    path = "/api/chain/info",
    responses(
        (status = 200, description = "Chain summary", body = ChainInfoResponse)
    )
)]
pub async fn chain_info(node: NodeData) -> HttpResponse {
    let (chain_length, latest_block) = node.chain_tip(|tip| LatestBlock {
        index: tip.index,
        hash: tip.hash.clone(),
        timestamp: tip.timestamp,
        transactions_count: tip.transactions.len(),
    });

    HttpResponse::Ok().json(ChainInfoResponse {
        success: true,
        chain_length,
        latest_block,
    })
}
