use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Capability, Node, NodeError};
use crate::blockchain::{Address, TransactionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    /// The reward transfer is waiting in the mempool
    Pending,
    /// The reward transfer is in a block
    Confirmed,
}

/// A reward paid by the collection node to a user wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RewardRecord {
    pub reward_id: String,
    pub user_address: Address,
    pub amount: f64,
    pub tx_id: String,
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub created_at: DateTime<Utc>,
    pub status: RewardStatus,
    pub block_index: Option<u64>,
}

impl Node {
    /// Pays `amount` (or the configured default) from this node's wallet to
    /// `user_address` and tracks the payment under a new reward id
    pub async fn assign_reward(
        &self,
        user_address: Address,
        amount: Option<f64>,
    ) -> Result<RewardRecord, NodeError> {
        self.role.authorize(Capability::AssignReward)?;

        if !user_address.is_well_formed() {
            return Err(TransactionError::Validation(format!(
                "malformed user address {}",
                user_address
            ))
            .into());
        }

        let amount = amount.unwrap_or(self.settings.economics.assign_reward);
        let transaction = self.create_transfer(user_address.clone(), amount).await?;

        let record = RewardRecord {
            reward_id: Uuid::new_v4().to_string(),
            user_address,
            amount,
            tx_id: transaction.tx_id,
            created_at: Utc::now(),
            status: RewardStatus::Pending,
            block_index: None,
        };
        self.store_reward(&record);
        self.rewards
            .insert(record.reward_id.clone(), record.clone());

        info!(
            "Assigned reward {} of {} to {}",
            record.reward_id, record.amount, record.user_address
        );
        Ok(record)
    }

    pub fn reward_status(&self, reward_id: &str) -> Result<RewardRecord, NodeError> {
        self.rewards
            .get(reward_id)
            .map(|record| record.value().clone())
            .ok_or_else(|| NodeError::NotFound(format!("reward {}", reward_id)))
    }

    /// Every reward, newest first
    pub fn rewards(&self) -> Vec<RewardRecord> {
        let mut records: Vec<RewardRecord> = self
            .rewards
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Re-derives each reward's status from the chain. A reward whose block
    /// was discarded by a chain swap goes back to pending.
    pub(crate) fn refresh_rewards(&self) {
        if self.rewards.is_empty() {
            return;
        }

        let mut changed = Vec::new();
        {
            let state = self.state.read();
            for mut entry in self.rewards.iter_mut() {
                let block_index = state.chain.block_index_of(&entry.tx_id);
                let status = match block_index {
                    Some(_) => RewardStatus::Confirmed,
                    None => RewardStatus::Pending,
                };
                if entry.status != status || entry.block_index != block_index {
                    entry.status = status;
                    entry.block_index = block_index;
                    changed.push(entry.value().clone());
                }
            }
        }

        for record in &changed {
            self.store_reward(record);
        }
    }

    fn store_reward(&self, record: &RewardRecord) {
        if let Some(storage) = &self.storage {
            if let Err(err) = storage.save_reward(&record.reward_id, record) {
                error!("Failed to persist reward {}: {}", record.reward_id, err);
            }
        }
    }
}
