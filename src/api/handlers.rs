use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::error::ApiError;
use crate::blockchain::ledger::HistoryFilter;
use crate::blockchain::{Address, Block, Transaction, TransactionError};
use crate::network::wire::{AddressInfo, ChainSnapshot, MempoolSnapshot, PeerAnnouncement, PeerList};
use crate::node::{Admission, Node, NodeRole};

/// Shared node state
pub type NodeData = web::Data<Node>;

/// Response for the index endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct NodeInfo {
    pub name: String,
    pub symbol: String,
    pub role: NodeRole,
    pub address: Address,
    pub url: String,
    pub chain_length: usize,
    pub pending_transactions: usize,
    pub peers: usize,
}

/// Response for the health endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub role: NodeRole,
    pub chain_length: usize,
    pub chain_valid: bool,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BalanceQuery {
    /// Address to look up; defaults to this node's wallet
    pub address: Option<String>,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: Address,
    /// Confirmed on-chain balance
    pub confirmed: f64,
    /// Net effect of pending transactions
    pub pending_delta: f64,
    pub total: f64,
    /// Confirmed balance minus pending outgoing transfers
    pub available: f64,
    pub symbol: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Address to look up; defaults to this node's wallet
    pub address: Option<String>,
    #[serde(default)]
    pub filter: HistoryFilter,
    #[serde(default = "default_include_pending")]
    pub include_pending: bool,
}

fn default_include_pending() -> bool {
    true
}

/// Request for the transfer endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransferRequest {
    /// The receiver's address
    pub receiver: String,

    /// The amount to transfer
    pub amount: f64,
}

/// Response for endpoints that create a transaction
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub message: String,
    pub transaction: Transaction,
}

/// Body of `/transaction`: either a transaction signed elsewhere or a
/// transfer for this node to sign
#[derive(Deserialize)]
#[serde(untagged)]
pub enum TransactionSubmission {
    Signed(Transaction),
    Local {
        sender: Option<String>,
        receiver: String,
        amount: f64,
    },
}

/// Response for `/receive_transaction`
#[derive(Serialize, Deserialize, ToSchema)]
pub struct AdmissionResponse {
    pub tx_id: String,
    pub status: Admission,
}

/// Response for the peer endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct PeerResponse {
    /// Whether the peer was new
    pub added: bool,
    pub peers: Vec<String>,
}

/// Generic acknowledgement
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.parse::<Address>().map_err(ApiError::from)
}

fn address_or_own(node: &Node, raw: Option<&str>) -> Result<Address, ApiError> {
    match raw {
        Some(raw) => parse_address(raw),
        None => Ok(node.address().clone()),
    }
}

/// Node overview
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Node information", body = NodeInfo)
    )
)]
pub async fn index(node: NodeData) -> HttpResponse {
    let stats = node.stats();
    let coin = &node.settings().coin;

    HttpResponse::Ok().json(NodeInfo {
        name: coin.name.clone(),
        symbol: coin.symbol.clone(),
        role: node.role(),
        address: node.address().clone(),
        url: node.url().to_string(),
        chain_length: stats.total_blocks,
        pending_transactions: stats.pending_transactions,
        peers: stats.peers,
    })
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Node is up", body = HealthResponse)
    )
)]
pub async fn health(node: NodeData) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        role: node.role(),
        chain_length: node.chain_length(),
        chain_valid: node.is_chain_valid(),
    })
}

/// The node's wallet address and public key
#[utoipa::path(
    get,
    path = "/address",
    responses(
        (status = 200, description = "Wallet address", body = AddressInfo)
    )
)]
pub async fn address(node: NodeData) -> HttpResponse {
    HttpResponse::Ok().json(AddressInfo {
        address: node.address().clone(),
        public_key: node.wallet().public_key_hex(),
    })
}

/// Balance of an address
#[utoipa::path(
    get,
    path = "/balance",
    params(BalanceQuery),
    responses(
        (status = 200, description = "Balance computed from the chain", body = BalanceResponse),
        (status = 400, description = "Malformed address", body = ErrorResponse)
    )
)]
pub async fn balance(
    node: NodeData,
    query: web::Query<BalanceQuery>,
) -> Result<HttpResponse, ApiError> {
    let address = address_or_own(&node, query.address.as_deref())?;
    let balance = node.balance(&address);
    let available = node.available_balance(&address);

    Ok(HttpResponse::Ok().json(BalanceResponse {
        address,
        confirmed: balance.confirmed,
        pending_delta: balance.pending_delta,
        total: balance.total,
        available,
        symbol: node.settings().coin.symbol.clone(),
    }))
}

/// Every non-zero confirmed balance
#[utoipa::path(
    get,
    path = "/balances",
    responses(
        (status = 200, description = "All balances", body = BalanceReport)
    )
)]
pub async fn balances(node: NodeData) -> HttpResponse {
    HttpResponse::Ok().json(node.balances())
}

/// Get the full blockchain
#[utoipa::path(
    get,
    path = "/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainSnapshot)
    )
)]
pub async fn chain(node: NodeData) -> HttpResponse {
    let chain = node.chain();
    HttpResponse::Ok().json(ChainSnapshot {
        length: chain.len(),
        chain,
    })
}

/// Get all pending transactions
#[utoipa::path(
    get,
    path = "/mempool",
    responses(
        (status = 200, description = "Pending transactions", body = MempoolSnapshot)
    )
)]
pub async fn mempool(node: NodeData) -> HttpResponse {
    let transactions = node.mempool();
    HttpResponse::Ok().json(MempoolSnapshot {
        count: transactions.len(),
        transactions,
    })
}

#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, description = "Node statistics", body = NodeStats)
    )
)]
pub async fn stats(node: NodeData) -> HttpResponse {
    HttpResponse::Ok().json(node.stats())
}

#[utoipa::path(
    get,
    path = "/peers",
    responses(
        (status = 200, description = "Known peers", body = PeerList)
    )
)]
pub async fn peers(node: NodeData) -> HttpResponse {
    let peers = node.peers();
    HttpResponse::Ok().json(PeerList {
        count: peers.len(),
        peers,
    })
}

/// Add a peer and announce this node to it
#[utoipa::path(
    post,
    path = "/add_peer",
    request_body = PeerAnnouncement,
    responses(
        (status = 200, description = "Peer recorded", body = PeerResponse),
        (status = 400, description = "Invalid peer URL", body = ErrorResponse)
    )
)]
pub async fn add_peer(
    node: NodeData,
    request: web::Json<PeerAnnouncement>,
) -> Result<HttpResponse, ApiError> {
    let added = node.add_peer(&request.peer, true).await?;
    Ok(HttpResponse::Ok().json(PeerResponse {
        added,
        peers: node.peers(),
    }))
}

/// A peer announcing itself
#[utoipa::path(
    post,
    path = "/announce_peer",
    request_body = PeerAnnouncement,
    responses(
        (status = 200, description = "Announcement accepted", body = PeerResponse),
        (status = 400, description = "Invalid peer URL", body = ErrorResponse)
    )
)]
pub async fn announce_peer(
    node: NodeData,
    request: web::Json<PeerAnnouncement>,
) -> Result<HttpResponse, ApiError> {
    let added = node.accept_announcement(&request.peer)?;
    Ok(HttpResponse::Ok().json(PeerResponse {
        added,
        peers: node.peers(),
    }))
}

/// Run one longest-valid-chain round against all peers
#[utoipa::path(
    get,
    path = "/consensus",
    responses(
        (status = 200, description = "Consensus result", body = ConsensusOutcome)
    )
)]
pub async fn consensus(node: NodeData) -> HttpResponse {
    HttpResponse::Ok().json(node.resolve_conflicts().await)
}

/// Run one full synchronisation round now
#[utoipa::path(
    post,
    path = "/sync",
    responses(
        (status = 200, description = "Sync result", body = SyncReport)
    )
)]
pub async fn sync(node: NodeData) -> HttpResponse {
    HttpResponse::Ok().json(node.sync_once().await)
}

/// Transaction history of an address
#[utoipa::path(
    get,
    path = "/transactions",
    params(HistoryQuery),
    responses(
        (status = 200, description = "History, pending first then newest block first", body = History),
        (status = 400, description = "Malformed address", body = ErrorResponse)
    )
)]
pub async fn transactions(
    node: NodeData,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, ApiError> {
    let address = address_or_own(&node, query.address.as_deref())?;
    Ok(HttpResponse::Ok().json(node.history(&address, query.filter, query.include_pending)))
}

/// Transaction history of the address in the path
#[utoipa::path(
    get,
    path = "/transactions/{address}",
    params(
        ("address" = String, Path, description = "Wallet address")
    ),
    responses(
        (status = 200, description = "History", body = History),
        (status = 400, description = "Malformed address", body = ErrorResponse)
    )
)]
pub async fn transactions_for(
    node: NodeData,
    address: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let address = parse_address(&address)?;
    Ok(HttpResponse::Ok().json(node.history(&address, HistoryFilter::All, true)))
}

/// Send coins from this node's wallet
#[utoipa::path(
    post,
    path = "/transfer",
    request_body = TransferRequest,
    responses(
        (status = 201, description = "Transfer signed and broadcast", body = TransactionResponse),
        (status = 400, description = "Invalid transfer or insufficient balance", body = ErrorResponse)
    )
)]
pub async fn transfer(
    node: NodeData,
    request: web::Json<TransferRequest>,
) -> Result<HttpResponse, ApiError> {
    let receiver = parse_address(&request.receiver)?;
    let transaction = node.create_transfer(receiver, request.amount).await?;

    Ok(HttpResponse::Created().json(TransactionResponse {
        message: "Transaction added to mempool".to_string(),
        transaction,
    }))
}

/// Submit a transaction
///
/// Accepts either a fully signed transaction or `{receiver, amount}` for
/// this node's wallet to sign.
#[utoipa::path(
    post,
    path = "/transaction",
    request_body = Transaction,
    responses(
        (status = 201, description = "Transaction accepted and broadcast", body = TransactionResponse),
        (status = 400, description = "Invalid transaction", body = ErrorResponse),
        (status = 409, description = "Transaction already known", body = ErrorResponse)
    )
)]
pub async fn submit_transaction(
    node: NodeData,
    submission: web::Json<TransactionSubmission>,
) -> Result<HttpResponse, ApiError> {
    let transaction = match submission.into_inner() {
        TransactionSubmission::Signed(transaction) => node.submit_transaction(transaction).await?,
        TransactionSubmission::Local {
            sender,
            receiver,
            amount,
        } => {
            if let Some(sender) = sender {
                if &parse_address(&sender)? != node.address() {
                    return Err(TransactionError::Validation(
                        "unsigned transactions may only spend this node's wallet".to_string(),
                    )
                    .into());
                }
            }
            node.create_transfer(parse_address(&receiver)?, amount).await?
        }
    };

    Ok(HttpResponse::Created().json(TransactionResponse {
        message: "Transaction added to mempool".to_string(),
        transaction,
    }))
}

/// A transaction gossiped by a peer
#[utoipa::path(
    post,
    path = "/receive_transaction",
    request_body = Transaction,
    responses(
        (status = 200, description = "Transaction admitted or already known", body = AdmissionResponse),
        (status = 400, description = "Invalid transaction", body = ErrorResponse)
    )
)]
pub async fn receive_transaction(
    node: NodeData,
    transaction: web::Json<Transaction>,
) -> Result<HttpResponse, ApiError> {
    let transaction = transaction.into_inner();
    let tx_id = transaction.tx_id.clone();
    let status = node.receive_transaction(transaction)?;

    Ok(HttpResponse::Ok().json(AdmissionResponse { tx_id, status }))
}

/// A block gossiped by a peer
#[utoipa::path(
    post,
    path = "/receive_block",
    request_body = Block,
    responses(
        (status = 200, description = "Block appended, already known, or resolved by consensus", body = BlockReceipt),
        (status = 409, description = "Block does not validate", body = ErrorResponse)
    )
)]
pub async fn receive_block(
    node: NodeData,
    block: web::Json<Block>,
) -> Result<HttpResponse, ApiError> {
    let receipt = node.receive_block(block.into_inner()).await?;
    Ok(HttpResponse::Ok().json(receipt))
}

/// Persist chain, mempool, peers and rewards
#[utoipa::path(
    post,
    path = "/save",
    responses(
        (status = 200, description = "State saved", body = MessageResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse)
    )
)]
pub async fn save(node: NodeData) -> Result<HttpResponse, ApiError> {
    node.save()?;
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: format!("Saved chain of length {}", node.chain_length()),
    }))
}

/// Stop services, save state and stop the server
#[utoipa::path(
    post,
    path = "/shutdown",
    responses(
        (status = 200, description = "Shutdown started", body = MessageResponse)
    )
)]
pub async fn shutdown(node: NodeData) -> HttpResponse {
    node.shutdown();
    HttpResponse::Ok().json(MessageResponse {
        message: "Node is shutting down".to_string(),
    })
}
