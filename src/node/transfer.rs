use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{LedgerState, Node, NodeError};
use crate::blockchain::ledger::{BalanceSheet, BALANCE_EPSILON};
use crate::blockchain::{Address, Transaction, TransactionError, TransactionKind};
use crate::config::SurplusPolicy;
use crate::network::gossip;
use crate::network::peers::normalize_url;

/// What happened to a transaction offered to the mempool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Accepted,
    AlreadyPending,
    AlreadyConfirmed,
}

impl Node {
    /// Validates `transaction` against confirmed balances net of pending
    /// outgoing transfers and adds it to the mempool.
    ///
    /// The check and the insert happen under one write lock, so two
    /// transfers racing for the same funds cannot both get in.
    pub fn admit_transaction(&self, transaction: Transaction) -> Result<Admission, NodeError> {
        let mut state = self.state.write();

        if state.chain.contains_tx(&transaction.tx_id) {
            return Ok(Admission::AlreadyConfirmed);
        }
        if state.mempool.contains(&transaction.tx_id) {
            return Ok(Admission::AlreadyPending);
        }
        if transaction.is_coinbase() {
            return Err(TransactionError::Validation(
                "coinbase transactions are only created by miners".to_string(),
            )
            .into());
        }

        {
            let LedgerState { chain, mempool } = &*state;
            let sheet = BalanceSheet::from_chain(chain.blocks());
            transaction
                .validate(|address| sheet.balance(address) - mempool.outgoing(address, None))?;
        }

        debug!("Admitted transaction {}", transaction.tx_id);
        state.mempool.insert(transaction);
        Ok(Admission::Accepted)
    }

    /// Admits a transaction arriving from a peer. It is not re-broadcast.
    pub fn receive_transaction(&self, transaction: Transaction) -> Result<Admission, NodeError> {
        self.admit_transaction(transaction)
    }

    /// Admits a client-submitted transaction and gossips it. Resubmitting a
    /// known transaction is a [`NodeError::Duplicate`].
    pub async fn submit_transaction(&self, transaction: Transaction) -> Result<Transaction, NodeError> {
        match self.admit_transaction(transaction.clone())? {
            Admission::Accepted => {}
            Admission::AlreadyPending => {
                return Err(NodeError::Duplicate(format!(
                    "transaction {} is already pending",
                    transaction.tx_id
                )))
            }
            Admission::AlreadyConfirmed => {
                return Err(NodeError::Duplicate(format!(
                    "transaction {} is already confirmed",
                    transaction.tx_id
                )))
            }
        }

        self.broadcast_transaction(&transaction).await;
        Ok(transaction)
    }

    /// Builds, signs and submits a transfer from this node's wallet
    pub async fn create_transfer(&self, receiver: Address, amount: f64) -> Result<Transaction, NodeError> {
        self.transfer(receiver, amount, TransactionKind::Transfer).await
    }

    async fn transfer(
        &self,
        receiver: Address,
        amount: f64,
        kind: TransactionKind,
    ) -> Result<Transaction, NodeError> {
        if &receiver == self.address() {
            return Err(TransactionError::Validation(
                "cannot transfer to this node's own address".to_string(),
            )
            .into());
        }

        let sender = self.address().clone();
        let mut transaction = match kind {
            TransactionKind::AutoTransfer => Transaction::auto_transfer(sender, receiver, amount),
            _ => Transaction::build(sender, receiver, amount),
        };
        transaction.sign(&self.wallet)?;

        let transaction = self.submit_transaction(transaction).await?;
        info!(
            "Created {:?} {} of {} to {}",
            kind, transaction.tx_id, transaction.amount, transaction.receiver
        );
        Ok(transaction)
    }

    pub(crate) async fn broadcast_transaction(&self, transaction: &Transaction) -> usize {
        let peers = self.peers();
        gossip::broadcast_transaction(self.client.as_ref(), &peers, transaction).await
    }

    /// Address of the collection node's wallet. Taken from configuration if
    /// set, otherwise fetched once from the collection node and cached.
    pub async fn collection_address(&self) -> Result<Address, NodeError> {
        if let Some(address) = self.collection_address.read().clone() {
            return Ok(address);
        }

        let url = normalize_url(&self.settings.network.collection_url)?;
        self.client.health(&url).await?;
        let address = self.client.fetch_address(&url).await?;

        info!("Collection node {} uses wallet {}", url, address);
        *self.collection_address.write() = Some(address.clone());
        Ok(address)
    }

    /// The collection address if it is already known, without a lookup
    pub fn known_collection_address(&self) -> Option<Address> {
        self.collection_address.read().clone()
    }

    /// Forwards surplus to the collection wallet once the available balance
    /// reaches the threshold. Returns the transfer, if one was made.
    pub async fn auto_transfer_tick(&self) -> Result<Option<Transaction>, NodeError> {
        let economics = &self.settings.economics;
        let available = self.available_balance(self.address());
        if available + BALANCE_EPSILON < economics.auto_transfer_threshold {
            return Ok(None);
        }

        let amount = match economics.auto_transfer_policy {
            SurplusPolicy::Threshold => economics.auto_transfer_threshold,
            SurplusPolicy::All => available,
        };
        if amount <= 0.0 {
            return Ok(None);
        }

        let collection = self.collection_address().await?;
        if &collection == self.address() {
            return Ok(None);
        }

        let transaction = self
            .transfer(collection, amount, TransactionKind::AutoTransfer)
            .await?;
        Ok(Some(transaction))
    }

    async fn auto_transfer_loop(self: Arc<Self>, stop: super::StopSignal) {
        let interval = self.settings.network.auto_transfer_interval();

        while stop.sleep(interval).await {
            if let Err(err) = self.auto_transfer_tick().await {
                warn!("Auto-transfer failed: {}", err);
            }
        }
        info!("Auto-transfer loop stopped");
    }

    pub fn start_auto_transfer(self: &Arc<Self>) -> bool {
        let node = Arc::clone(self);
        self.auto_transfer
            .start(move |stop| node.auto_transfer_loop(stop))
    }

    pub fn stop_auto_transfer(&self) -> bool {
        self.auto_transfer.stop()
    }

    pub fn auto_transfer_state(&self) -> super::ServiceState {
        self.auto_transfer.state()
    }
}
