// Endpoints only a miner node serves

use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::auth::{AutoTransferCap, Authorized, MineCap};
use super::error::ApiError;
use crate::blockchain::{Address, Block};
use crate::node::{ServiceState, StopSignal};

/// Response for service start/stop requests
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ServiceResponse {
    pub service: String,
    pub state: ServiceState,
    /// False if the service was already in the requested state
    pub changed: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MiningStatus {
    pub state: ServiceState,
    pub blocks_mined: u64,
    pub difficulty: usize,
    pub engine: String,
    pub chain_length: usize,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct AutoTransferStatus {
    pub state: ServiceState,
    pub threshold: f64,
    pub available: f64,
    /// Known once the collection node has been contacted
    pub collection_address: Option<Address>,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    pub message: String,
    pub block: Block,
}

/// Start the mining loop
#[utoipa::path(
    post,
    path = "/mining/start",
    responses(
        (status = 200, description = "Mining loop running", body = ServiceResponse),
        (status = 403, description = "Not a miner node", body = ErrorResponse)
    )
)]
pub async fn start_mining(auth: Authorized<MineCap>) -> HttpResponse {
    let changed = auth.node().start_mining();
    HttpResponse::Ok().json(ServiceResponse {
        service: "mining".to_string(),
        state: auth.mining_state(),
        changed,
    })
}

/// Ask the mining loop to stop
#[utoipa::path(
    post,
    path = "/mining/stop",
    responses(
        (status = 200, description = "Stop requested", body = ServiceResponse),
        (status = 403, description = "Not a miner node", body = ErrorResponse)
    )
)]
pub async fn stop_mining(auth: Authorized<MineCap>) -> HttpResponse {
    let changed = auth.stop_mining();
    HttpResponse::Ok().json(ServiceResponse {
        service: "mining".to_string(),
        state: auth.mining_state(),
        changed,
    })
}

#[utoipa::path(
    get,
    path = "/mining/status",
    responses(
        (status = 200, description = "Mining status", body = MiningStatus),
        (status = 403, description = "Not a miner node", body = ErrorResponse)
    )
)]
pub async fn mining_status(auth: Authorized<MineCap>) -> HttpResponse {
    let stats = auth.stats();
    HttpResponse::Ok().json(MiningStatus {
        state: stats.mining,
        blocks_mined: stats.blocks_mined,
        difficulty: stats.difficulty,
        engine: auth.engine_name().to_string(),
        chain_length: stats.total_blocks,
    })
}

/// Mine a single block now
#[utoipa::path(
    get,
    path = "/mine",
    responses(
        (status = 200, description = "Block mined and broadcast", body = MineResponse),
        (status = 403, description = "Not a miner node", body = ErrorResponse)
    )
)]
pub async fn mine(auth: Authorized<MineCap>) -> Result<HttpResponse, ApiError> {
    let block = auth
        .mine_block(&StopSignal::new())
        .await?
        .ok_or_else(|| ApiError::Internal("mining was interrupted".to_string()))?;

    Ok(HttpResponse::Ok().json(MineResponse {
        message: "New Block Mined".to_string(),
        block,
    }))
}

/// Start forwarding surplus to the collection node
#[utoipa::path(
    post,
    path = "/autotransfer/start",
    responses(
        (status = 200, description = "Auto-transfer loop running", body = ServiceResponse),
        (status = 403, description = "Not a miner node", body = ErrorResponse)
    )
)]
pub async fn start_auto_transfer(auth: Authorized<AutoTransferCap>) -> HttpResponse {
    let changed = auth.node().start_auto_transfer();
    HttpResponse::Ok().json(ServiceResponse {
        service: "auto-transfer".to_string(),
        state: auth.auto_transfer_state(),
        changed,
    })
}

#[utoipa::path(
    post,
    path = "/autotransfer/stop",
    responses(
        (status = 200, description = "Stop requested", body = ServiceResponse),
        (status = 403, description = "Not a miner node", body = ErrorResponse)
    )
)]
pub async fn stop_auto_transfer(auth: Authorized<AutoTransferCap>) -> HttpResponse {
    let changed = auth.stop_auto_transfer();
    HttpResponse::Ok().json(ServiceResponse {
        service: "auto-transfer".to_string(),
        state: auth.auto_transfer_state(),
        changed,
    })
}

#[utoipa::path(
    get,
    path = "/autotransfer/status",
    responses(
        (status = 200, description = "Auto-transfer status", body = AutoTransferStatus),
        (status = 403, description = "Not a miner node", body = ErrorResponse)
    )
)]
pub async fn auto_transfer_status(auth: Authorized<AutoTransferCap>) -> HttpResponse {
    HttpResponse::Ok().json(AutoTransferStatus {
        state: auth.auto_transfer_state(),
        threshold: auth.settings().economics.auto_transfer_threshold,
        available: auth.available_balance(auth.address()),
        collection_address: auth.known_collection_address(),
    })
}
