// JSON bodies exchanged between nodes. The HTTP handlers produce these and
// the peer client consumes them.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Address, Block, Transaction};

/// Response for the chain endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainSnapshot {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,
}

/// Response for the mempool endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MempoolSnapshot {
    pub count: usize,
    pub transactions: Vec<Transaction>,
}

/// Response for the peers endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PeerList {
    pub peers: Vec<String>,
    pub count: usize,
}

/// Response for the address endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddressInfo {
    pub address: Address,
    pub public_key: String,
}

/// Body of `/add_peer` and `/announce_peer`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PeerAnnouncement {
    /// URL of the peer to add
    pub peer: String,

    /// URL of the node making the announcement
    #[serde(default)]
    pub from: Option<String>,
}
