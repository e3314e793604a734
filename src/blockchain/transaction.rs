use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{self, Address, CryptoError, DigitalSignature, Wallet};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid transaction: {0}")]
    Validation(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Kind of value movement a transaction represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Block reward minted for the miner
    Coinbase,
    /// Signed transfer between two wallets
    Transfer,
    /// Signed transfer raised by a miner's auto-transfer service
    AutoTransfer,
}

/// Represents a transaction in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// SHA-256 over sender, receiver, amount and timestamp
    pub tx_id: String,

    #[serde(rename = "tx_type")]
    pub kind: TransactionKind,

    /// Sender's address, `None` for coinbase transactions
    pub sender: Option<Address>,

    /// Receiver's address
    pub receiver: Address,

    /// Amount being transferred
    pub amount: f64,

    /// Timestamp when the transaction was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Signature over the signing payload
    pub signature: Option<DigitalSignature>,

    /// Sender's public key as hex of the raw 64 bytes
    pub sender_public_key: Option<String>,
}

impl Transaction {
    /// Creates a new unsigned transfer
    ///
    /// # Arguments
    ///
    /// * `sender` - The address of the sender
    /// * `receiver` - The address of the receiver
    /// * `amount` - The amount to transfer
    ///
    /// # Returns
    ///
    /// A new unsigned Transaction with its id computed
    pub fn build(sender: Address, receiver: Address, amount: f64) -> Self {
        Self::with_kind(TransactionKind::Transfer, Some(sender), receiver, amount)
    }

    /// Creates a new unsigned auto-transfer
    pub fn auto_transfer(sender: Address, receiver: Address, amount: f64) -> Self {
        Self::with_kind(TransactionKind::AutoTransfer, Some(sender), receiver, amount)
    }

    /// Creates a coinbase transaction minting `reward` for `miner`
    pub fn coinbase(miner: Address, reward: f64) -> Self {
        Self::with_kind(TransactionKind::Coinbase, None, miner, reward)
    }

    fn with_kind(
        kind: TransactionKind,
        sender: Option<Address>,
        receiver: Address,
        amount: f64,
    ) -> Self {
        let mut transaction = Transaction {
            tx_id: String::new(),
            kind,
            sender,
            receiver,
            amount,
            timestamp: Utc::now(),
            signature: None,
            sender_public_key: None,
        };
        transaction.tx_id = transaction.compute_id();
        transaction
    }

    fn id_fields(&self) -> serde_json::Value {
        let sender = self.sender.as_ref().map(|address| address.as_str());

        serde_json::json!({
            "amount": self.amount,
            "receiver": self.receiver.as_str(),
            "sender": sender,
            "timestamp": self.timestamp,
        })
    }

    /// Bytes covered by the signature: the id fields plus the transaction kind
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut fields = self.id_fields();
        fields["tx_type"] = serde_json::json!(self.kind);
        fields.to_string().into_bytes()
    }

    /// Recomputes the transaction id from its contents
    pub fn compute_id(&self) -> String {
        crypto::sha256_hex(self.id_fields().to_string().as_bytes())
    }

    /// Signs the transaction with a wallet, attaching the signature and the
    /// wallet's public key
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Err(TransactionError::Validation(
                "coinbase transactions are not signed".to_string(),
            ));
        }

        if self.sender.as_ref() != Some(wallet.address()) {
            return Err(TransactionError::Signature(
                "wallet address does not match sender".to_string(),
            ));
        }

        self.signature = Some(wallet.sign(&self.signing_payload())?);
        self.sender_public_key = Some(wallet.public_key_hex());

        Ok(())
    }

    pub fn is_coinbase(&self) -> bool {
        self.kind == TransactionKind::Coinbase
    }

    /// Checks the transaction is well formed, independent of chain state
    pub fn validate_structure(&self) -> Result<(), TransactionError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(TransactionError::Validation(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }

        if !self.receiver.is_well_formed() {
            return Err(TransactionError::Validation(format!(
                "malformed receiver address {}",
                self.receiver
            )));
        }

        match (&self.sender, self.is_coinbase()) {
            (Some(_), true) => {
                return Err(TransactionError::Validation(
                    "coinbase transaction must not have a sender".to_string(),
                ))
            }
            (None, false) => {
                return Err(TransactionError::Validation(
                    "transaction has no sender".to_string(),
                ))
            }
            (Some(sender), false) => {
                if !sender.is_well_formed() {
                    return Err(TransactionError::Validation(format!(
                        "malformed sender address {}",
                        sender
                    )));
                }
                if sender == &self.receiver {
                    return Err(TransactionError::Validation(
                        "sender and receiver are the same".to_string(),
                    ));
                }
            }
            (None, true) => {}
        }

        if self.tx_id != self.compute_id() {
            return Err(TransactionError::Validation(
                "tx_id does not match transaction contents".to_string(),
            ));
        }

        Ok(())
    }

    /// Verifies the signature and that the attached key belongs to the sender
    pub fn verify_signature(&self) -> Result<(), TransactionError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| TransactionError::Signature("transaction has no sender".to_string()))?;

        let (signature, public_key) = match (&self.signature, &self.sender_public_key) {
            (Some(signature), Some(public_key)) => (signature, public_key),
            _ => {
                return Err(TransactionError::Signature(
                    "transaction is not signed".to_string(),
                ))
            }
        };

        if crypto::verify(sender, public_key, &self.signing_payload(), signature) {
            Ok(())
        } else {
            Err(TransactionError::Signature(format!(
                "signature verification failed for {}",
                self.tx_id
            )))
        }
    }

    /// Full admission check: structure, then signature, then balance.
    ///
    /// # Arguments
    ///
    /// * `balance_lookup` - Spendable balance of an address at admission time
    pub fn validate<F>(&self, balance_lookup: F) -> Result<(), TransactionError>
    where
        F: Fn(&Address) -> f64,
    {
        self.validate_structure()?;

        if self.is_coinbase() {
            return Ok(());
        }

        self.verify_signature()?;

        if let Some(sender) = &self.sender {
            let available = balance_lookup(sender);
            if available + f64::EPSILON < self.amount {
                return Err(TransactionError::InsufficientBalance {
                    required: self.amount,
                    available,
                });
            }
        }

        Ok(())
    }
}
