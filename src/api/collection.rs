// Endpoints only the collection node serves

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::auth::{AssignRewardCap, Authorized};
use super::error::ApiError;
use crate::blockchain::Address;
use crate::node::RewardStatus;

/// Request for the assign reward endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct AssignRewardRequest {
    /// Wallet that receives the reward
    pub user_address: String,

    /// Defaults to the configured reward amount
    pub amount: Option<f64>,
}

/// Response for the assign reward endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct AssignRewardResponse {
    pub reward_id: String,
    pub tx_id: String,
    pub status: RewardStatus,
}

/// Pay a reward from the collection wallet
#[utoipa::path(
    post,
    path = "/assign_reward",
    request_body = AssignRewardRequest,
    responses(
        (status = 201, description = "Reward transaction broadcast", body = AssignRewardResponse),
        (status = 400, description = "Invalid address or insufficient balance", body = ErrorResponse),
        (status = 403, description = "Not the collection node", body = ErrorResponse)
    )
)]
pub async fn assign_reward(
    auth: Authorized<AssignRewardCap>,
    request: web::Json<AssignRewardRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_address: Address = request.user_address.parse()?;
    let record = auth.assign_reward(user_address, request.amount).await?;

    Ok(HttpResponse::Created().json(AssignRewardResponse {
        reward_id: record.reward_id,
        tx_id: record.tx_id,
        status: record.status,
    }))
}

/// Status of one reward
#[utoipa::path(
    get,
    path = "/reward_status/{reward_id}",
    params(
        ("reward_id" = String, Path, description = "Id returned by /assign_reward")
    ),
    responses(
        (status = 200, description = "Reward record", body = RewardRecord),
        (status = 403, description = "Not the collection node", body = ErrorResponse),
        (status = 404, description = "Unknown reward id", body = ErrorResponse)
    )
)]
pub async fn reward_status(
    auth: Authorized<AssignRewardCap>,
    reward_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(auth.reward_status(&reward_id)?))
}

/// Every reward, newest first
#[utoipa::path(
    get,
    path = "/rewards",
    responses(
        (status = 200, description = "Reward records", body = Vec<RewardRecord>),
        (status = 403, description = "Not the collection node", body = ErrorResponse)
    )
)]
pub async fn rewards(auth: Authorized<AssignRewardCap>) -> HttpResponse {
    HttpResponse::Ok().json(auth.rewards())
}
